//! Broadcast-style shutdown signaling between the consumer and the flush worker.
//!
//! A single shutdown request must reach every interested task (the flush worker and the
//! termination-signal listener), so the channel is built on [`tokio::sync::watch`]
//! rather than an mpsc channel.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Cloneable so that both the consumer's close path and the termination-signal task can
/// request a stop. Requesting shutdown is cooperative: receivers finish their in-flight
/// work before exiting.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

impl ShutdownTx {
    /// Notifies all subscribed receivers that shutdown was requested.
    ///
    /// Fails only when no receiver is alive anymore, which callers may safely ignore
    /// since it means there is nothing left to stop.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver subscribed to this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown channel.
///
/// The receiver half is dropped; tasks obtain their own receivers via
/// [`ShutdownTx::subscribe`], which keeps ownership of the transmitter in one place.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_the_shutdown_request() {
        let (tx, _rx) = create_shutdown_channel();
        let mut rx = tx.subscribe();

        tx.shutdown().unwrap();

        rx.changed().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_receivers_reports_an_error() {
        let (tx, rx) = create_shutdown_channel();
        drop(rx);

        assert!(tx.shutdown().is_err());
    }
}
