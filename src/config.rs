//! Server tunables

use std::path::PathBuf;
use std::time::Duration;

/// Port served when the command line does not name one.
pub const DEFAULT_LISTEN_PORT: u16 = 80;

/// Loopback port shared by all worker agents via `SO_REUSEPORT`.
pub const WORKER_PORT: u16 = 9898;

/// Number of long-lived dynamic-content agents. Tune to core count.
pub const WORKER_COUNT: usize = 4;

/// Listen backlog. Large enough to avoid connection resets under bursts.
pub const MAX_LISTEN_QUEUE: i32 = 10_000;

/// Readiness events drained per poll wait.
pub const MAX_POLL_EVENTS: usize = 10_000;

/// Soft and hard `RLIMIT_NOFILE` requested at startup.
pub const MAX_FD_LIMIT: u64 = 100_000;

/// Chunk size for forwarding worker output and for zero-copy transfer.
pub const MAX_READ_LENGTH: usize = 8192;

/// Bound on the resource name carried in an internal request record.
pub const MAX_RESOURCE_NAME_LENGTH: usize = 100;

/// Aggregate byte capacity of the module cache.
pub const MAX_CACHE_SIZE: u64 = 4 * 1024 * 1024;

/// Period between revalidation sweeps over cached modules.
pub const CACHE_INVALIDATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Period between statistics reports.
pub const STAT_INTERVAL: Duration = Duration::from_secs(5);

/// Runtime configuration for one server instance.
///
/// `Default` mirrors the constants above; tests override the ports and the
/// resource roots to point at scratch directories.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the reactor listens on.
    pub port: u16,
    /// Loopback port of the worker agent pool.
    pub worker_port: u16,
    /// Number of worker agents.
    pub worker_count: usize,
    /// Directory holding static resources.
    pub static_root: PathBuf,
    /// Directory holding dynamic `.so` modules.
    pub cgi_root: PathBuf,
    /// Whether loaded modules are kept in the cache between requests.
    pub caching: bool,
    /// Module cache capacity in bytes.
    pub cache_capacity: u64,
    /// Revalidation sweep period.
    pub revalidation_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LISTEN_PORT,
            worker_port: WORKER_PORT,
            worker_count: WORKER_COUNT,
            static_root: PathBuf::from("./static"),
            cgi_root: PathBuf::from("./cgi-bin"),
            caching: true,
            cache_capacity: MAX_CACHE_SIZE,
            revalidation_period: CACHE_INVALIDATION_TIMEOUT,
        }
    }
}
