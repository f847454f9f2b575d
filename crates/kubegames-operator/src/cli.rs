//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use kubegames_common::telemetry::LogFormat;
use kubegames_common::DEFAULT_RETRY_DELAY_SECS;
use kubegames_controller::ControllerConfig;

/// kubegames - runs Game servers as pods and drains them before removal
#[derive(Parser, Debug)]
#[command(name = "kubegames-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the Game CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Path to a kubeconfig; in-cluster configuration when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Worker loops per reconciler
    #[arg(short, long, env = "KUBEGAMES_THREADINESS", default_value_t = 1)]
    pub threadiness: usize,

    /// Listen address of the admission webhook
    #[arg(long, env = "KUBEGAMES_WEBHOOK_ADDR", default_value = "0.0.0.0:443")]
    pub webhook_addr: SocketAddr,

    /// Directory holding tls.crt and tls.key for the webhook
    #[arg(long, env = "KUBEGAMES_TLS_DIR", default_value = "/run/secrets/tls")]
    pub tls_dir: PathBuf,

    /// Seconds before a failed key is retried
    #[arg(long, env = "KUBEGAMES_RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay_secs: u64,

    /// Seconds to wait for the initial Game and pod lists
    #[arg(long, env = "KUBEGAMES_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub cache_sync_timeout_secs: u64,

    /// Timeout in seconds of drain calls to game servers
    #[arg(long, env = "KUBEGAMES_DRAIN_TIMEOUT_SECS", default_value_t = 5)]
    pub drain_timeout_secs: u64,

    /// Install or refresh the Game CRD at startup
    #[arg(long, env = "KUBEGAMES_INSTALL_CRDS")]
    pub install_crds: bool,

    /// Run the controllers without the admission webhook
    #[arg(long, env = "KUBEGAMES_NO_WEBHOOK")]
    pub no_webhook: bool,

    /// Log output: json or text
    #[arg(long, env = "KUBEGAMES_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Reconciler settings from the parsed flags
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            threadiness: self.threadiness.max(1),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }
}
