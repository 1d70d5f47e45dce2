//! Status-service callbacks for dashboard-triggered backups.
//!
//! A backup started with `--dash-auth <backup-id>:<token>` reports its
//! outcome to the dashboard. Delivery retries server errors and connection
//! failures with a fixed delay; every other reply is final. The
//! [`ExitGuard`] makes sure a failure is reported when a run ends without
//! reaching a reported state.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metadata::{BackupMetadata, sanitize_count};

mod guard;

pub use guard::ExitGuard;

/// Per-attempt HTTP timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between delivery attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Initial attempt plus three retries.
pub const MAX_ATTEMPTS: u32 = 4;

const SUCCESS_METHOD: &str = "easydash.easydash.doctype.site_backup.site_backup.on_ee_backup_success";
const FAILURE_METHOD: &str = "easydash.easydash.doctype.site_backup.site_backup.on_ee_backup_failure";

/// Errors raised while configuring or delivering callbacks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DashError {
    /// Raised when `--dash-auth` is not `<backup-id>:<token>`.
    #[error("Invalid --dash-auth format. Expected: backup-id:backup-verification-token")]
    InvalidAuth,
    /// Raised when callbacks are requested without a status-service URL.
    #[error(
        "ed-api-url is not configured. Set SITE_BACKUP_ED_API_URL or ed_api_url in site-backup.toml"
    )]
    MissingApiUrl,
    /// Raised when the HTTP client cannot be built.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Client builder error message.
        message: String,
    },
    /// Raised when a callback was not accepted.
    #[error("callback to {endpoint} failed after {attempts} attempt(s): {reason}")]
    Delivery {
        /// Endpoint the callback was posted to.
        endpoint: String,
        /// Attempts made.
        attempts: u32,
        /// Last status or connection error.
        reason: String,
    },
}

/// Backup ID and verification token issued by the dashboard.
#[derive(Clone, Eq, PartialEq)]
pub struct DashAuth {
    /// Dashboard-side backup record ID.
    pub backup_id: String,
    /// Token proving the callback comes from this run. Never logged.
    pub verify_token: String,
}

impl fmt::Debug for DashAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashAuth")
            .field("backup_id", &self.backup_id)
            .field("verify_token", &"<redacted>")
            .finish()
    }
}

impl FromStr for DashAuth {
    type Err = DashError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (backup_id, verify_token) = raw.split_once(':').ok_or(DashError::InvalidAuth)?;
        if backup_id.is_empty() || verify_token.is_empty() {
            return Err(DashError::InvalidAuth);
        }
        Ok(Self {
            backup_id: backup_id.to_owned(),
            verify_token: verify_token.to_owned(),
        })
    }
}

/// Where a session stands with the dashboard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallbackOutcome {
    /// Nothing has been reported yet.
    Pending,
    /// The success callback was accepted.
    Succeeded,
    /// A final callback was sent or given up on.
    FailedFinal,
}

/// Dashboard state for one backup run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DashSession {
    site: String,
    auth: DashAuth,
    outcome: CallbackOutcome,
}

impl DashSession {
    /// Starts a pending session for `site`.
    #[must_use]
    pub const fn new(site: String, auth: DashAuth) -> Self {
        Self {
            site,
            auth,
            outcome: CallbackOutcome::Pending,
        }
    }

    /// Site the session reports on.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Credentials issued by the dashboard.
    #[must_use]
    pub const fn auth(&self) -> &DashAuth {
        &self.auth
    }

    /// Current outcome.
    #[must_use]
    pub const fn outcome(&self) -> CallbackOutcome {
        self.outcome
    }

    fn base_payload(&self) -> serde_json::Map<String, Value> {
        let mut payload = serde_json::Map::new();
        payload.insert(String::from("site"), Value::from(self.site.as_str()));
        payload.insert(
            String::from("backup"),
            Value::from(self.auth.backup_id.as_str()),
        );
        payload.insert(
            String::from("verify"),
            Value::from(self.auth.verify_token.as_str()),
        );
        payload
    }
}

/// A status code and body returned by the status service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body, for diagnostics.
    pub body: String,
}

/// Errors raised before an HTTP status is available.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised on DNS, connect, TLS or timeout failures.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Future returned by [`CallbackTransport::post_json`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpReply, TransportError>> + Send + 'a>>;

/// Posts JSON to the status service.
pub trait CallbackTransport: Send + Sync {
    /// Posts `body` to `url` and returns the reply.
    fn post_json<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportFuture<'a>;
}

/// [`CallbackTransport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport with the per-attempt timeout applied.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Client`] when the TLS backend cannot be set up.
    pub fn new() -> Result<Self, DashError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| DashError::Client {
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl CallbackTransport for HttpTransport {
    fn post_json<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|err| TransportError::Connection(err.to_string()))?;
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            Ok(HttpReply { status, body: text })
        })
    }
}

/// Sends success and failure callbacks with retry.
#[derive(Clone, Debug)]
pub struct DashClient<T: CallbackTransport> {
    transport: T,
    api_url: String,
    retry_delay: Duration,
}

impl DashClient<HttpTransport> {
    /// Builds an HTTP client for the configured status-service URL.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::MissingApiUrl`] when the URL is absent or blank.
    pub fn connect(api_url: Option<&str>, retry_delay: Duration) -> Result<Self, DashError> {
        let url = api_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(DashError::MissingApiUrl)?;
        Ok(Self::new(HttpTransport::new()?, url, retry_delay))
    }
}

impl<T: CallbackTransport> DashClient<T> {
    /// Builds a client posting below `api_url`.
    pub fn new(transport: T, api_url: &str, retry_delay: Duration) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_owned(),
            retry_delay,
        }
    }

    /// Endpoint for successful backups.
    #[must_use]
    pub fn success_endpoint(&self) -> String {
        format!("{}/{SUCCESS_METHOD}", self.api_url)
    }

    /// Endpoint for failed backups.
    #[must_use]
    pub fn failure_endpoint(&self) -> String {
        format!("{}/{FAILURE_METHOD}", self.api_url)
    }

    /// Reports a completed backup. The session ends `Succeeded` when the
    /// dashboard accepts it and `FailedFinal` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Delivery`] when the callback was not accepted.
    pub async fn send_success(
        &self,
        session: &mut DashSession,
        metadata: &BackupMetadata,
    ) -> Result<(), DashError> {
        debug!(
            site = session.site(),
            backup = %session.auth.backup_id,
            "sending success callback"
        );
        let mut payload = session.base_payload();
        payload.insert(String::from("metadata"), success_metadata(metadata));
        let result = self
            .deliver(&self.success_endpoint(), &Value::Object(payload))
            .await;
        session.outcome = if result.is_ok() {
            CallbackOutcome::Succeeded
        } else {
            CallbackOutcome::FailedFinal
        };
        result
    }

    /// Reports a failed backup. The session always ends `FailedFinal`.
    ///
    /// # Errors
    ///
    /// Returns [`DashError::Delivery`] when the callback was not accepted.
    pub async fn send_failure(&self, session: &mut DashSession) -> Result<(), DashError> {
        debug!(
            site = session.site(),
            backup = %session.auth.backup_id,
            "sending failure callback"
        );
        let payload = Value::Object(session.base_payload());
        session.outcome = CallbackOutcome::FailedFinal;
        self.deliver(&self.failure_endpoint(), &payload).await
    }

    async fn deliver(&self, endpoint: &str, payload: &Value) -> Result<(), DashError> {
        let mut attempt = 1;
        loop {
            let reply = self.transport.post_json(endpoint, payload).await;
            let reason = match &reply {
                Ok(response) if (200..300).contains(&response.status) => {
                    info!("dashboard callback sent successfully");
                    debug!(body = %response.body, "dashboard response");
                    return Ok(());
                }
                Ok(response) => format!("HTTP {}: {}", response.status, response.body.trim()),
                Err(err) => err.to_string(),
            };
            let retryable = match &reply {
                Ok(response) => (500..600).contains(&response.status),
                Err(_) => true,
            };
            if !retryable || attempt >= MAX_ATTEMPTS {
                warn!(%endpoint, attempts = attempt, %reason, "dashboard callback failed");
                return Err(DashError::Delivery {
                    endpoint: endpoint.to_owned(),
                    attempts: attempt,
                    reason,
                });
            }
            warn!(
                %reason,
                attempt,
                max_attempts = MAX_ATTEMPTS,
                delay_secs = self.retry_delay.as_secs(),
                "dashboard callback failed, retrying"
            );
            tokio::time::sleep(self.retry_delay).await;
            attempt += 1;
        }
    }
}

fn success_metadata(metadata: &BackupMetadata) -> Value {
    let counts = metadata.wordpress.clone().unwrap_or_default();
    let site_type = if metadata.site_type.is_empty() {
        "html"
    } else {
        metadata.site_type.as_str()
    };
    json!({
        "post_count": sanitize_count(&counts.post_count),
        "theme_count": sanitize_count(&counts.theme_count),
        "user_count": sanitize_count(&counts.user_count),
        "plugin_count": sanitize_count(&counts.plugin_count),
        "wp_version": counts.wp_version,
        "comment_count": sanitize_count(&counts.comment_count),
        "page_count": sanitize_count(&counts.page_count),
        "upload_count": sanitize_count(&counts.upload_count),
        "site_type": site_type,
        "remote_path": metadata.remote_path,
    })
}

#[cfg(test)]
mod tests;
