//! "Chat list changed" notification shared between views.
//!
//! Chat creation, rename and delete publish here after the server confirms; any view holding
//! its own copy of the history subscribes and reloads.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

/// The chat list changed on the server. Carries no payload; subscribers reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatListChanged;

/// Publish/subscribe handle. Clones share the same channel.
#[derive(Clone)]
pub struct ChatListEvents {
    tx: broadcast::Sender<ChatListChanged>,
}

impl Default for ChatListEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatListEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> ChatListSubscription {
        ChatListSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Notify all current subscribers. Having none is fine.
    pub fn notify(&self) {
        let n = self.tx.send(ChatListChanged).unwrap_or(0);
        log::debug!("chat list changed ({} subscriber(s))", n);
    }
}

/// Receiving end of [`ChatListEvents`].
pub struct ChatListSubscription {
    rx: broadcast::Receiver<ChatListChanged>,
}

impl ChatListSubscription {
    /// Non-blocking check for UI loops: true if at least one notification arrived since the last
    /// call. Several pending notifications collapse into one.
    pub fn drain(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.rx.try_recv() {
                Ok(ChatListChanged) => changed = true,
                Err(broadcast::error::TryRecvError::Lagged(_)) => changed = true,
                Err(_) => break,
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_without_subscribers_is_harmless() {
        ChatListEvents::new().notify();
    }

    #[test]
    fn drain_collapses_pending_notifications() {
        let events = ChatListEvents::new();
        let mut sub = events.subscribe();
        assert!(!sub.drain());
        events.notify();
        events.notify();
        assert!(sub.drain());
        assert!(!sub.drain());
    }

    #[test]
    fn clones_publish_to_every_subscriber() {
        let events = ChatListEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        events.clone().notify();
        assert!(a.drain());
        assert!(b.drain());
    }

    #[test]
    fn overflow_still_reads_as_changed() {
        let events = ChatListEvents::new();
        let mut sub = events.subscribe();
        for _ in 0..CHANNEL_CAPACITY * 2 {
            events.notify();
        }
        assert!(sub.drain());
        assert!(!sub.drain());
    }
}
