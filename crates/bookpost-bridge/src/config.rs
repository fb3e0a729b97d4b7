use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for every configured duration. Larger values behave as if
/// they never elapse and cannot overflow a deadline.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn bounded(duration: Duration) -> Duration {
    duration.min(MAX_DURATION)
}

/// How the client matches backend notifications to its own request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    /// Events carrying another request's correlation id are ignored; events
    /// without one are classified by their text. Default value.
    #[default]
    Lenient,
    /// Only events echoing this request's correlation id are considered.
    Strict,
}

/// Client-side settings for one delivery lifecycle.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum time a request may stay in flight before it is failed as
    /// timed out, in seconds.
    pub timeout_secs: u64,
    /// Delay before a successful delivery is dismissed, in milliseconds.
    pub auto_dismiss_ms: u64,
    /// Lifetime of the remembered destination address, in days.
    pub remember_address_days: u32,
    /// Matching policy for incoming notifications.
    pub correlation: CorrelationMode,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        bounded(Duration::from_secs(self.timeout_secs))
    }

    pub fn auto_dismiss(&self) -> Duration {
        bounded(Duration::from_millis(self.auto_dismiss_ms))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6 * 60,
            auto_dismiss_ms: 3000,
            remember_address_days: 365,
            correlation: CorrelationMode::default(),
        }
    }
}

/// Settings for downloading requested resources on the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base URL that resource identifiers are resolved against.
    pub source_url: String,
    /// Directory the `books` folder with downloaded files lives in.
    pub download_dir: PathBuf,
    /// Interval between checks for a finished download, in seconds.
    pub poll_interval_secs: u64,
    /// Maximum time to wait for a download before giving up, in seconds.
    pub max_wait_secs: u64,
    /// Keep delivered files instead of deleting them after sending.
    pub persist: bool,
}

impl FetchConfig {
    pub fn books_dir(&self) -> PathBuf {
        self.download_dir.join("books")
    }

    pub fn poll_interval(&self) -> Duration {
        bounded(Duration::from_secs(self.poll_interval_secs))
    }

    pub fn max_wait(&self) -> Duration {
        bounded(Duration::from_secs(self.max_wait_secs))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            source_url: "http://127.0.0.1:8080/books/".to_string(),
            download_dir: std::env::temp_dir().join("bookpost"),
            poll_interval_secs: 2,
            max_wait_secs: 5 * 60,
            persist: false,
        }
    }
}

/// How finished messages leave the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MailTransport {
    /// Send through the configured SMTP relay. Default value.
    #[default]
    Smtp,
    /// Write `.eml` files into `outbox_dir` for a local mail agent.
    PickupDir,
}

/// Settings for the outgoing mail transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// Whether mail delivery is configured at all.
    pub enabled: bool,
    pub transport: MailTransport,
    /// SMTP server host.
    pub smtp_host: String,
    /// SMTP server port.
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Upgrade the SMTP connection with STARTTLS.
    pub use_tls: bool,
    /// Sender address placed in the `From` header.
    pub from_address: String,
    /// Pickup directory used by [`MailTransport::PickupDir`].
    pub outbox_dir: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: MailTransport::default(),
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            use_tls: true,
            from_address: String::new(),
            outbox_dir: std::env::temp_dir().join("bookpost").join("outbox"),
        }
    }
}

/// Global application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Client-side delivery lifecycle settings.
    pub delivery: DeliveryConfig,
    /// Backend download settings.
    pub fetch: FetchConfig,
    /// Backend mail settings.
    pub mail: MailConfig,
}
