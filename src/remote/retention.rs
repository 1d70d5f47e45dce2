//! N+1 retention: the newest `keep` generations survive once more than
//! `keep + 1` are stored.

use tracing::{debug, info, warn};

use super::{BackupId, RemoteStore};
use crate::process::CommandRunner;

/// Default number of generations to keep.
pub const DEFAULT_KEEP: usize = 7;

/// Number of generations kept per site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    keep: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP)
    }
}

impl RetentionPolicy {
    /// Keeps the newest `keep` generations.
    #[must_use]
    pub const fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// Configured count.
    #[must_use]
    pub const fn keep(self) -> usize {
        self.keep
    }

    /// Generations to purge from a newest-first listing, oldest first.
    ///
    /// Nothing is purged until the listing holds more than `keep + 1`
    /// entries.
    #[must_use]
    pub fn excess(self, newest_first: &[BackupId]) -> Vec<BackupId> {
        if newest_first.len() <= self.keep.saturating_add(1) {
            return Vec::new();
        }
        newest_first
            .get(self.keep..)
            .unwrap_or_default()
            .iter()
            .rev()
            .cloned()
            .collect()
    }
}

/// Outcome of one pruning pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PruneSummary {
    /// Generations deleted.
    pub purged: Vec<BackupId>,
    /// Generations whose deletion failed.
    pub failed: Vec<BackupId>,
}

impl<R: CommandRunner> RemoteStore<R> {
    /// Applies `policy` to `site`. Listing and purge failures are logged as
    /// warnings; a failed purge does not stop the remaining ones.
    pub fn prune(&self, site: &str, policy: RetentionPolicy) -> PruneSummary {
        let generations = match self.list_generations(site) {
            Ok(generations) => generations,
            Err(err) => {
                warn!(site, error = %err, "could not list backups for cleanup");
                return PruneSummary::default();
            }
        };
        let excess = policy.excess(&generations);
        if excess.is_empty() {
            debug!(
                site,
                current = generations.len(),
                keep = policy.keep(),
                "no cleanup needed"
            );
            return PruneSummary::default();
        }

        info!(site, keep = policy.keep(), "cleaning up old backups");
        let mut summary = PruneSummary::default();
        for id in excess {
            let path = self.generation_path(site, &id);
            match self.purge(&path) {
                Ok(()) => {
                    debug!(%path, "deleted old backup");
                    summary.purged.push(id);
                }
                Err(err) => {
                    warn!(%path, error = %err, "failed to delete old backup");
                    summary.failed.push(id);
                }
            }
        }
        info!(site, purged = summary.purged.len(), "cleaned up old backup(s)");
        summary
    }
}
