use std::sync::Arc;

use tokio::sync::watch;

/// Host-side visibility signal. The host calls [`VisibilityRelay::set_hidden`]
/// whenever the tracked surface is backgrounded or foregrounded; trackers
/// follow it through [`VisibilityRelay::subscribe`].
#[derive(Debug, Clone)]
pub struct VisibilityRelay {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for VisibilityRelay {
    fn default() -> Self {
        Self::new(false)
    }
}

impl VisibilityRelay {
    pub fn new(hidden: bool) -> Self {
        let (tx, _rx) = watch::channel(hidden);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes a new visibility. Repeating the current value does not
    /// notify subscribers.
    pub fn set_hidden(&self, hidden: bool) {
        self.tx.send_if_modified(|current| {
            if *current == hidden {
                false
            } else {
                *current = hidden;
                true
            }
        });
    }

    pub fn is_hidden(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_changes_reach_subscribers() {
        let relay = VisibilityRelay::default();
        let mut rx = relay.subscribe();

        relay.set_hidden(false);
        assert!(!rx.has_changed().unwrap());

        relay.set_hidden(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(relay.is_hidden());
    }
}
