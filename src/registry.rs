//! Holder for the single live plugin connection.
//!
//! At most one connection is attached at a time. Attaching replaces the
//! previous one without closing it; that socket's own close event calls
//! [`ConnectionRegistry::detach`] with its id, which is ignored once a newer
//! connection has taken the slot.

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::protocol::OutboundMessage;

struct PluginConnection {
    id: Uuid,
    tx: UnboundedSender<String>,
}

#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    current: Mutex<Option<PluginConnection>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `tx` the live connection. Returns the id to detach with.
    pub(crate) fn attach(&self, tx: UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        let previous = self.current.lock().replace(PluginConnection { id, tx });
        if let Some(previous) = previous {
            tracing::info!("Plugin connection {} replaced by {id}", previous.id);
        } else {
            tracing::info!("Plugin connected ({id})");
        }
        id
    }

    /// Clear the slot if `id` still owns it. Returns whether it did.
    pub(crate) fn detach(&self, id: Uuid) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            tracing::info!("Plugin disconnected ({id})");
            true
        } else {
            tracing::debug!("Ignoring detach from stale connection {id}");
            false
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Serialize and queue `message` on the live connection.
    ///
    /// Returns `false` when nothing is attached or the connection's writer has
    /// already gone away; a dead writer also clears the slot.
    pub(crate) fn send(&self, message: &OutboundMessage) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize {}: {e}", message.type_name());
                return false;
            }
        };

        let mut current = self.current.lock();
        let Some(conn) = current.as_ref() else {
            tracing::debug!("Dropping {}: no plugin connected", message.type_name());
            return false;
        };
        if conn.tx.send(json).is_err() {
            tracing::warn!("Plugin writer for {} is closed; detaching", conn.id);
            *current = None;
            return false;
        }
        true
    }
}
