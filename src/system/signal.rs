//! Root shutdown signal
//!
//! One watch channel fans the OS shutdown signal (ctrl-c, SIGTERM) out to
//! every long-running task. Receivers either poll `is_shutdown()` between
//! units of work or await `changed()` inside a `select!`.

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownHandle, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, ShutdownSignal { rx })
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn cancelled(&mut self) {
        // changed() 返回 Err 说明发送端已销毁，同样视为关闭
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Wait for ctrl-c or SIGTERM, then flip the shutdown signal.
pub async fn listen_for_shutdown(handle: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                wait_ctrl_c().await;
                info!("Shutdown signal received");
                handle.trigger();
                return;
            }
        };
        tokio::select! {
            _ = wait_ctrl_c() => info!("Shutdown signal received (ctrl-c)"),
            _ = sigterm.recv() => info!("Shutdown signal received (SIGTERM)"),
        }
    }

    #[cfg(not(unix))]
    {
        wait_ctrl_c().await;
        info!("Shutdown signal received");
    }

    handle.trigger();
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            "Failed to listen for ctrl-c: {}. Proceeding with shutdown anyway.",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (handle, mut signal) = ShutdownSignal::new();
        assert!(!signal.is_shutdown());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            true
        });

        handle.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_shutdown() {
        let (handle, mut signal) = ShutdownSignal::new();
        drop(handle);
        // 不应永远挂起
        signal.cancelled().await;
    }
}
