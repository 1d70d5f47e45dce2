//! Core library for the site backup engine.
//!
//! A backup locks the site, checks tools and disk space, snapshots files,
//! configuration and database into a working directory, uploads the result
//! as a timestamped generation to an rclone remote, and either prunes old
//! generations or reports to the dashboard. A restore selects a generation,
//! verifies it against the live site and lays it back per site type.
//!
//! External tools (`ee`, `rclone`, `7z`, `unzip`, `rsync`) are driven through
//! the [`CommandRunner`] seam so every step can be exercised with a scripted
//! runner.

pub mod archive;
pub mod backup;
pub mod config;
pub mod dash;
pub mod database;
pub mod disk;
pub mod fs_ops;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod preflight;
pub mod process;
pub mod remote;
pub mod restore;
pub mod site;
pub mod test_support;
pub mod toolkit;
pub mod wordpress;

pub use archive::{ArchiveBinaries, ArchiveComposer, ArchiveError, ArchiveUnpacker};
pub use backup::{BackupError, BackupOrchestrator, BackupReport, BackupStage};
pub use config::{BackupConfig, ConfigError};
pub use dash::{
    CallbackOutcome, CallbackTransport, DashAuth, DashClient, DashError, DashSession, ExitGuard,
    HttpTransport,
};
pub use disk::{HostDisk, Shortfall, SpaceOperation, SpaceProbe};
pub use lock::{LockError, LockManager, SiteLock};
pub use logging::LoggingError;
pub use metadata::{BackupMetadata, MetaManifest};
pub use preflight::{HostPlatform, Preflight, PreflightError};
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};
pub use remote::{BackupId, PruneSummary, RemoteError, RemoteStore, RetentionPolicy};
pub use restore::{Incompatibility, RestoreError, RestoreOrchestrator, RestoreReport};
pub use site::{SiteDirectory, SiteKind, SiteLookupError, SiteManager, SiteSnapshot};
pub use toolkit::Toolkit;
