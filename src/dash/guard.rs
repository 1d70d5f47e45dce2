//! Failure reporting for runs that end before a callback was sent.

use tracing::{info, warn};

use super::{CallbackOutcome, CallbackTransport, DashClient, DashError, DashSession};
use crate::metadata::BackupMetadata;

/// Owns the dashboard session for a run.
///
/// While the session is still pending, dropping the guard (an early error
/// return, a panic, or the run's future being cancelled) sends the failure
/// callback on a dedicated thread and waits for it.
#[derive(Debug)]
pub struct ExitGuard<T>
where
    T: CallbackTransport + Clone + 'static,
{
    client: DashClient<T>,
    session: DashSession,
}

impl<T> ExitGuard<T>
where
    T: CallbackTransport + Clone + 'static,
{
    /// Arms the guard for `session`.
    #[must_use]
    pub fn arm(client: DashClient<T>, session: DashSession) -> Self {
        info!(
            site = session.site(),
            backup = %session.auth().backup_id,
            "dashboard reporting enabled"
        );
        Self { client, session }
    }

    /// Current outcome of the guarded session.
    #[must_use]
    pub const fn outcome(&self) -> CallbackOutcome {
        self.session.outcome()
    }

    /// Sends the success callback, disarming the guard either way.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Delivery`] when the dashboard did not accept
    /// the callback.
    pub async fn report_success(&mut self, metadata: &BackupMetadata) -> Result<(), DashError> {
        self.client.send_success(&mut self.session, metadata).await
    }

    /// Sends the failure callback when nothing has been reported yet.
    pub async fn settle(&mut self) {
        if self.session.outcome() != CallbackOutcome::Pending {
            return;
        }
        if let Err(err) = self.client.send_failure(&mut self.session).await {
            warn!(error = %err, "failure callback was not delivered");
        }
    }
}

impl<T> Drop for ExitGuard<T>
where
    T: CallbackTransport + Clone + 'static,
{
    fn drop(&mut self) {
        if self.session.outcome() != CallbackOutcome::Pending {
            return;
        }
        warn!(
            site = self.session.site(),
            "run ended before completion, notifying dashboard"
        );
        let client = self.client.clone();
        let mut session = self.session.clone();
        let handle = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            match runtime {
                Ok(runtime) => {
                    if let Err(err) = runtime.block_on(client.send_failure(&mut session)) {
                        warn!(error = %err, "failure callback was not delivered");
                    }
                }
                Err(err) => warn!(error = %err, "could not start runtime for failure callback"),
            }
        });
        if handle.join().is_err() {
            warn!("failure callback thread panicked");
        }
        self.session.outcome = CallbackOutcome::FailedFinal;
    }
}
