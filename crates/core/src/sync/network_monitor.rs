//! Connectivity observation.

use tokio::sync::watch;

/// Observes connectivity transitions.
///
/// `subscribe` hands out a receiver whose value flips on every transition;
/// the engine's reconnect listener watches for the offline→online edge.
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel-backed monitor driven by the app shell.
///
/// The platform reachability callback (or a test) calls
/// [`ChannelNetworkMonitor::set_online`] on every transition.
#[derive(Debug)]
pub struct ChannelNetworkMonitor {
    tx: watch::Sender<bool>,
}

impl ChannelNetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Publish a connectivity change. No-op when the state is unchanged,
    /// so subscribers only wake on real transitions.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl Default for ChannelNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ChannelNetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions_only() {
        let monitor = ChannelNetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!monitor.is_online());

        monitor.set_online(false); // unchanged, must not wake
        monitor.set_online(true);
        rx.changed().await.expect("sender alive");
        assert!(*rx.borrow());
        assert!(monitor.is_online());
    }
}
