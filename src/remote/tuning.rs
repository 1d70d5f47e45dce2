//! Transfer flags derived from the host's cores and free memory.

use std::ffi::OsString;

use sysinfo::System;
use tracing::debug;

/// Largest per-transfer read-ahead buffer, in MiB.
const MAX_BUFFER_MIB: u64 = 4096;

/// Upper bound for parallel streams and S3 part uploads.
const MAX_STREAMS: u64 = 32;

const MIB: u64 = 1024 * 1024;

/// Host capacity used to size transfers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HostResources {
    /// Logical CPU cores.
    pub cores: u64,
    /// Memory available to new processes, in MiB.
    pub available_ram_mib: u64,
}

impl HostResources {
    /// Reads core count and available memory from the running host.
    #[must_use]
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let resources = Self {
            cores: u64::try_from(num_cpus::get()).unwrap_or(1),
            available_ram_mib: system.available_memory().checked_div(MIB).unwrap_or(0),
        };
        debug!(
            cores = resources.cores,
            available_ram_mib = resources.available_ram_mib,
            "host resources detected"
        );
        resources
    }

    const fn streams(self) -> u64 {
        let doubled = self.cores.saturating_mul(2);
        if doubled < MAX_STREAMS { doubled } else { MAX_STREAMS }
    }
}

/// Flags for `rclone copy` when uploading.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UploadTuning {
    /// Parallel transfers, also used for checkers.
    pub transfers: u64,
    /// Per-transfer buffer in MiB.
    pub buffer_mib: u64,
    /// Concurrent part uploads, for S3 backends only.
    pub s3_upload_concurrency: Option<u64>,
}

impl UploadTuning {
    /// Sizes an upload for `host`; `s3` adds multipart settings.
    #[must_use]
    pub fn for_host(host: HostResources, s3: bool) -> Self {
        let transfers = host.cores.checked_div(2).unwrap_or(0).clamp(2, 4);
        let buffer_mib = host
            .available_ram_mib
            .checked_div(transfers)
            .unwrap_or(0)
            .min(MAX_BUFFER_MIB);
        Self {
            transfers,
            buffer_mib,
            s3_upload_concurrency: s3.then(|| host.streams()),
        }
    }

    /// Flags placed between `copy` and the paths.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(concurrency) = self.s3_upload_concurrency {
            args.push(OsString::from("--s3-chunk-size=64M"));
            args.push(OsString::from("--s3-upload-concurrency"));
            args.push(OsString::from(concurrency.to_string()));
        }
        let transfers = self.transfers.to_string();
        for flag in ["--transfers", "--checkers"] {
            args.push(OsString::from(flag));
            args.push(OsString::from(&transfers));
        }
        args.push(OsString::from("--buffer-size"));
        args.push(OsString::from(format!("{}M", self.buffer_mib)));
        args
    }
}

/// Flags for `rclone copy` when downloading.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DownloadTuning {
    /// Streams used for each large file.
    pub streams: u64,
}

impl DownloadTuning {
    /// Sizes a download for `host`.
    #[must_use]
    pub const fn for_host(host: HostResources) -> Self {
        Self {
            streams: host.streams(),
        }
    }

    /// Flags placed between `copy` and the paths.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        vec![
            OsString::from("--multi-thread-streams"),
            OsString::from(self.streams.to_string()),
        ]
    }
}
