//! Pending request slots keyed by correlation id.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::protocol::Message;

struct Slot {
    server: String,
    reply: oneshot::Sender<Message>,
}

/// Requests awaiting exactly one correlated reply.
///
/// A slot is removed when it is completed, cancelled, or its server is lost.
/// Completing an id that has no slot (a late or duplicate reply) does nothing.
#[derive(Default)]
pub struct PendingRequests {
    slots: HashMap<String, Slot>,
}

impl PendingRequests {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for `id` on `server`.
    ///
    /// Returns `None` if a request with the same id is already outstanding.
    pub fn register(&mut self, id: &str, server: &str) -> Option<oneshot::Receiver<Message>> {
        if self.slots.contains_key(id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id.to_string(), Slot { server: server.to_string(), reply: tx });
        Some(rx)
    }

    /// Deliver a reply. Returns whether a waiting slot took it.
    pub fn complete(&mut self, message: Message) -> bool {
        let Some(slot) = message.id.as_deref().and_then(|id| self.slots.remove(id)) else {
            return false;
        };
        slot.reply.send(message).is_ok()
    }

    /// Drop a slot without a reply.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Drop every slot of a server; waiters see their channel close.
    pub fn fail_server(&mut self, server: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.server != server);
        before - self.slots.len()
    }

    /// Drop every slot.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Check if a slot is open for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Get the number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::MessageBody;

    fn reply(id: &str) -> Message {
        Message::request(id, MessageBody::Health {})
    }

    #[test]
    fn test_reply_resolves_slot_once() {
        let mut pending = PendingRequests::new();
        let mut rx = pending.register("c1", "ws://a").unwrap();

        assert!(pending.complete(reply("c1")));
        assert!(!pending.contains("c1"));
        assert_eq!(rx.try_recv().unwrap().id.as_deref(), Some("c1"));

        // Duplicate reply for the same id is a no-op
        assert!(!pending.complete(reply("c1")));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected_while_outstanding() {
        let mut pending = PendingRequests::new();
        let _rx = pending.register("c1", "ws://a").unwrap();
        assert!(pending.register("c1", "ws://a").is_none());
    }

    #[test]
    fn test_late_reply_after_cancel_is_dropped() {
        let mut pending = PendingRequests::new();
        let _rx = pending.register("c1", "ws://a").unwrap();
        assert!(pending.cancel("c1"));
        assert!(!pending.complete(reply("c1")));
    }

    #[test]
    fn test_reply_without_id_is_ignored() {
        let mut pending = PendingRequests::new();
        let _rx = pending.register("c1", "ws://a").unwrap();
        assert!(!pending.complete(Message::new(None, MessageBody::Health {})));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_fail_server_closes_waiters() {
        let mut pending = PendingRequests::new();
        let mut a = pending.register("a1", "ws://a").unwrap();
        let _b = pending.register("b1", "ws://b").unwrap();

        assert_eq!(pending.fail_server("ws://a"), 1);
        assert!(matches!(a.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(pending.contains("b1"));
    }
}
