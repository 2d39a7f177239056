use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::binary::jid::MessageId;

/// Externally owned retry-counter store, shared so counts survive restarts.
pub type RetryCounterMap = Arc<tokio::sync::Mutex<HashMap<MessageId, u8>>>;

/// Sink for failures inside spawned tasks. They are reported here and never
/// allowed to abort the pipeline.
pub type UnexpectedErrorHook = Arc<dyn Fn(&anyhow::Error, &str) + Send + Sync>;

/// Behavior switches for one socket instance.
///
/// Logging goes through the `log` facade; the embedder installs whatever
/// logger implementation it wants.
#[derive(Clone)]
pub struct SocketConfig {
    /// Emit ciphertext-stub messages to subscribers instead of suppressing
    /// them while the retry workflow runs.
    pub treat_ciphertext_messages_as_real: bool,
    /// Optional pause after each retry request, giving the peer time to
    /// resend before the next stanza is processed.
    pub retry_request_delay: Option<Duration>,
    /// Honor history-sync notifications.
    pub download_history: bool,
    /// Quiet period before the history gate fires one app-state resync.
    pub history_sync_debounce: Duration,
    /// Externally owned retry counters; a fresh map is used when absent.
    pub retry_counters: Option<RetryCounterMap>,
    /// Replaces the default `log::error!` unexpected-error sink.
    pub on_unexpected_error: Option<UnexpectedErrorHook>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            treat_ciphertext_messages_as_real: false,
            retry_request_delay: None,
            download_history: true,
            history_sync_debounce: Duration::from_secs(6),
            retry_counters: None,
            on_unexpected_error: None,
        }
    }
}
