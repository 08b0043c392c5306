use tokio::sync::watch;

pub use crate::model::ConnectivityStatus;

/// Network path monitor. The runtime forwards the value at subscription time
/// when it is `Lost`, then every change.
pub trait ConnectivityMonitor: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus>;
}

/// Host-driven monitor for platforms that push path updates in.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<ConnectivityStatus>,
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(ConnectivityStatus::Restored)
    }
}

impl ManualConnectivity {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, status: ConnectivityStatus) {
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }
}
