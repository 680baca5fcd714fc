use crate::backoff::Backoff;
use crate::connection::{ConnectionEvent, ConnectionSupervisor};
use lapin::Channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Maintains exactly one open channel on top of a supervised connection,
/// recreating it whenever the connection or channel is lost. Shared by
/// Producer and Consumer; channels are never shared across owners.
pub struct ChannelOwner {
    label: String,
    supervisor: Arc<ConnectionSupervisor>,
    channel: Mutex<Option<Channel>>,
    // single-slot re-initialization guard: a trigger that arrives while a
    // rebuild is in flight is dropped, not queued
    rebuild_gate: tokio::sync::Mutex<()>,
    // notified by the channel's own error hook; channel-level closes (a 404
    // on publish, a conflicting declare) happen with the connection healthy
    lost: Arc<Notify>,
    base_delay: Duration,
}

impl ChannelOwner {
    /// Create the owner and spawn its event watcher. Rebuilds eagerly on
    /// every connect/loss notification from the supervisor.
    pub fn new(supervisor: Arc<ConnectionSupervisor>, label: &str) -> Arc<Self> {
        let base_delay = supervisor.base_delay();
        let owner = Arc::new(ChannelOwner {
            label: label.to_string(),
            supervisor,
            channel: Mutex::new(None),
            rebuild_gate: tokio::sync::Mutex::new(()),
            lost: Arc::new(Notify::new()),
            base_delay,
        });

        let watcher = Arc::clone(&owner);
        tokio::spawn(async move {
            watcher.watch_events().await;
        });

        let on_loss = Arc::clone(&owner);
        tokio::spawn(async move {
            loop {
                on_loss.lost.notified().await;
                if on_loss.supervisor.is_closing() {
                    return;
                }
                on_loss.ensure_ready().await;
            }
        });

        let initial = Arc::clone(&owner);
        tokio::spawn(async move {
            initial.ensure_ready().await;
        });

        owner
    }

    /// The live channel, if one exists right now. Never blocks.
    pub fn current(&self) -> Option<Channel> {
        let guard = self.channel.lock().unwrap();
        match &*guard {
            Some(channel) if channel.status().connected() => Some(channel.clone()),
            _ => None,
        }
    }

    /// Rebuild the channel if it is missing or dead. Concurrent triggers
    /// coalesce: if a rebuild is already running this returns immediately.
    pub async fn ensure_ready(&self) {
        let Ok(_guard) = self.rebuild_gate.try_lock() else {
            debug!(owner = %self.label, "channel rebuild already in flight");
            return;
        };

        let mut backoff = Backoff::new(self.base_delay);
        loop {
            if self.supervisor.is_closing() {
                return;
            }
            if self.current().is_some() {
                return;
            }

            if let Some(connection) = self.supervisor.connection() {
                match connection.create_channel().await {
                    Ok(channel) => {
                        let lost = Arc::clone(&self.lost);
                        let label = self.label.clone();
                        channel.on_error(move |err| {
                            warn!(owner = %label, error = %err, "channel-level error");
                            lost.notify_one();
                        });
                        info!(owner = %self.label, "channel ready");
                        *self.channel.lock().unwrap() = Some(channel);
                        return;
                    }
                    Err(err) => {
                        // channel creation failures are transient; try again
                        warn!(owner = %self.label, error = %err, "channel creation failed");
                    }
                }
            }

            let delay = backoff.next_delay();
            sleep(delay).await;
        }
    }

    async fn watch_events(self: Arc<Self>) {
        let mut events = self.supervisor.subscribe();
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::GracefulClose) => return,
                Ok(_) => self.ensure_ready().await,
                // a lagged receiver just re-checks state
                Err(RecvError::Lagged(_)) => self.ensure_ready().await,
                Err(RecvError::Closed) => return,
            }
        }
    }
}
