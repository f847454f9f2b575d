//! Controller settings

use std::time::Duration;

use kubegames_common::DEFAULT_RETRY_DELAY_SECS;

/// Settings shared by both reconcilers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Worker loops per reconciler
    pub threadiness: usize,
    /// Delay before a failed key is retried
    pub retry_delay: Duration,
    /// How long startup waits for the initial list of Games and pods
    pub cache_sync_timeout: Duration,
    /// Connect and call timeout of drain RPCs
    pub drain_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threadiness: 1,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            cache_sync_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
