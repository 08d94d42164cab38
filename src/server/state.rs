//! Shared server state behind a single async mutex.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::push::PushDispatcher;
use crate::server::config::Config;
use crate::server::rate_limit::RateLimiter;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Storage,
    pub config: Config,
    /// Shared so handlers can dispatch over the network without holding the
    /// state lock.
    pub push: Arc<PushDispatcher>,
    pub limiter: RateLimiter,
    pub started_at: Instant,
}

pub type SharedState = Arc<Mutex<AppState>>;
