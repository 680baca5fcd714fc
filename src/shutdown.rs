use crate::consumer::{BatchConsumer, SingleMessageConsumer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// Anything that can be told to stop accepting new work. Both consumer
/// variants implement this.
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

impl Stoppable for SingleMessageConsumer {
    fn stop(&self) {
        SingleMessageConsumer::stop(self);
    }
}

impl Stoppable for BatchConsumer {
    fn stop(&self) {
        BatchConsumer::stop(self);
    }
}

/// Coordinates process shutdown: on a termination signal every registered
/// consumer is stopped, then a fixed grace period passes before returning
/// so in-flight handler invocations can finish.
pub struct ShutdownGuard {
    grace: Duration,
    consumers: Mutex<Vec<Arc<dyn Stoppable>>>,
}

impl ShutdownGuard {
    pub fn new(grace: Duration) -> Self {
        ShutdownGuard {
            grace,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, consumer: Arc<dyn Stoppable>) {
        self.consumers.lock().unwrap().push(consumer);
    }

    /// Wait for SIGINT/SIGTERM, stop all registered consumers, then sleep
    /// out the grace period.
    pub async fn run(&self) {
        wait_for_signal().await;
        self.stop_all().await;
    }

    /// Stop everything and wait the grace period, without waiting for a
    /// signal first.
    pub async fn stop_all(&self) {
        let consumers: Vec<Arc<dyn Stoppable>> = {
            let guard = self.consumers.lock().unwrap();
            guard.iter().map(Arc::clone).collect()
        };
        info!(consumers = consumers.len(), "stopping consumers for shutdown");
        for consumer in consumers {
            consumer.stop();
        }
        sleep(self.grace).await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}
