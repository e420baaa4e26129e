use std::time::Duration;

use clap::Parser;

/// Process configuration. Every field can be set by flag or by the matching
/// `CLUSTERSECRET_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "clustersecret-controller", version, about)]
pub struct Config {
    /// How often to re-enqueue every cached ClusterSecret for reconciliation,
    /// as a fallback retry path for transient errors.
    #[arg(long, env = "CLUSTERSECRET_RESYNC_INTERVAL_SECS", default_value_t = 600)]
    pub resync_interval_secs: u64,

    /// Timeout applied to every individual cluster API call.
    #[arg(long, env = "CLUSTERSECRET_API_TIMEOUT_SECS", default_value_t = 30)]
    pub api_timeout_secs: u64,

    /// Author string written into the management annotation.
    #[arg(
        long,
        env = "CLUSTERSECRET_MANAGED_BY",
        default_value = "clustersecret-controller"
    )]
    pub managed_by: String,

    /// tracing env-filter directive, e.g. "info" or "clustersecret_controller=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}
