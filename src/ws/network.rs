use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::broadcast;

use super::traits::{NetworkMonitor, Reachability};

const UNKNOWN: u8 = 0;
const ONLINE: u8 = 1;
const OFFLINE: u8 = 2;

const EDGE_CAPACITY: usize = 16;

/// A [`NetworkMonitor`] fed by the application, e.g. from an OS reachability callback.
///
/// Only edges are broadcast: setting the status it already has is silent.
///
/// ```
/// use pubsub_socket::ws::{Network, NetworkMonitor as _};
///
/// let network = Network::default();
/// assert_eq!(network.is_online(), None);
///
/// network.set_online(false);
/// assert_eq!(network.is_online(), Some(false));
/// ```
#[derive(Debug)]
pub struct Network {
    status: AtomicU8,
    edges: broadcast::Sender<Reachability>,
}

impl Network {
    #[must_use]
    pub fn new(online: Option<bool>) -> Self {
        let (edges, _) = broadcast::channel(EDGE_CAPACITY);
        Self {
            status: AtomicU8::new(encode(online)),
            edges,
        }
    }

    pub fn set_online(&self, online: bool) {
        let next = encode(Some(online));
        let previous = self.status.swap(next, Ordering::SeqCst);
        if previous == next {
            return;
        }

        let edge = if online {
            Reachability::Online
        } else {
            Reachability::Offline
        };
        _ = self.edges.send(edge);
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NetworkMonitor for Network {
    fn is_online(&self) -> Option<bool> {
        match self.status.load(Ordering::SeqCst) {
            ONLINE => Some(true),
            OFFLINE => Some(false),
            _ => None,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Reachability> {
        self.edges.subscribe()
    }
}

const fn encode(online: Option<bool>) -> u8 {
    match online {
        None => UNKNOWN,
        Some(true) => ONLINE,
        Some(false) => OFFLINE,
    }
}
