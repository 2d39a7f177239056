use std::sync::Arc;

use log::debug;

use crate::client::Client;
use crate::types::message::{HistorySyncNotice, WebMessage};

impl Client {
    /// Records one history-carrying message and restarts the debounce
    /// window. Once the stream has been quiet for the configured period a
    /// single app-state resync is fired with the accumulated chat deltas.
    pub(crate) async fn note_history_batch(
        self: &Arc<Self>,
        msg: &WebMessage,
        notice: &HistorySyncNotice,
    ) {
        {
            let mut cache = self.history_cache.lock().await;
            cache.insert(format!("{}:{}", msg.key.id, notice.chunk_order));
        }
        {
            let mut chats = self.recv_chats.lock().await;
            let delta = chats.entry(msg.key.remote_jid.clone()).or_default();
            if msg.message_timestamp > delta.last_message_recv_timestamp {
                delta.last_message_recv_timestamp = msg.message_timestamp;
            }
        }
        self.restart_history_gate().await;
    }

    async fn restart_history_gate(self: &Arc<Self>) {
        let mut timer = self.history_timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        let client = self.clone();
        let window = self.config.history_sync_debounce;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            client.fire_history_gate().await;
        }));
    }

    /// Debounce expiry: one resync, then both caches are cleared. Errors go
    /// to the unexpected-error sink and the timer is not re-armed.
    pub(crate) async fn fire_history_gate(self: &Arc<Self>) {
        let recv_chats = self.recv_chats.lock().await.clone();
        if self.transport.is_open() {
            debug!(
                target: "Socket/HistorySync",
                "History stream quiet, resyncing app state for {} chat(s)", recv_chats.len()
            );
            if let Err(e) = self.app_state.resync_main_app_state(recv_chats).await {
                self.report_unexpected(&e, "resync-main-app-state");
            }
        } else {
            debug!(target: "Socket/HistorySync", "Transport closed, skipping app-state resync");
        }
        self.history_cache.lock().await.clear();
        self.recv_chats.lock().await.clear();
    }
}
