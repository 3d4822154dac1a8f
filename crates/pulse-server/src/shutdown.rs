//! Graceful shutdown coordination.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

/// Fans a shutdown signal out to every component that asked for one.
pub struct ShutdownCoordinator {
    notify: Arc<Notify>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout_secs: u64) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            drain_timeout: Duration::from_secs(drain_timeout_secs),
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: Arc::clone(&self.notify),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn trigger(&self) {
        info!("shutdown signal sent to all components");
        self.notify.notify_waiters();
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Resolve when SIGTERM or SIGINT arrives.
pub async fn signal_received() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
                unreachable!()
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_are_notified() {
        let coordinator = ShutdownCoordinator::new(5);
        let handle = coordinator.handle();

        let waiter = tokio::spawn(async move {
            handle.wait().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.trigger();

        assert!(waiter.await.unwrap());
        assert_eq!(coordinator.drain_timeout(), Duration::from_secs(5));
    }
}
