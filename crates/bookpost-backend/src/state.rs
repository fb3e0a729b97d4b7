use bookpost_bridge::config::Config;

use crate::tracker::DownloadTracker;

/// The core application state that holds configuration, the download
/// bookkeeping and other shared resources.
///
/// It is designed to be wrapped in thread-safe, async-friendly concurrency
/// primitives (see [`SharedState`]) so fetch and delivery tasks can read it
/// concurrently and update the tracker now and then.
#[derive(Debug)]
pub struct State {
    /// The loaded application configuration.
    pub config: Config,
    /// Shared HTTP client for making efficient, pooled requests.
    pub request_client: reqwest::Client,
    /// Downloads requested by clients, keyed by tracking key.
    pub downloads: DownloadTracker,
}

impl State {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            request_client: reqwest::Client::new(),
            downloads: DownloadTracker::default(),
        }
    }
}

/// Thread-safe, async-friendly shared reference to the application [`State`].
pub type SharedState = std::sync::Arc<tokio::sync::RwLock<State>>;
