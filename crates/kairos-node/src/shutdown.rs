//! Graceful shutdown helper.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::info;

/// Listens for SIGTERM and SIGINT and broadcasts one shutdown notification
/// to every component holding a receiver.
pub struct Shutdown {
    tx_shutdown: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (tx_shutdown, _) = broadcast::channel(1);
        Self { tx_shutdown }
    }
}

impl Shutdown {
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx_shutdown.subscribe()
    }

    pub async fn run(&self) -> Result<(), ()> {
        let mut sigterm = signal(SignalKind::terminate()).map_err(|_| ())?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|_| ())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
        };

        self.tx_shutdown.send(()).map(|_| ()).map_err(|_| ())
    }
}
