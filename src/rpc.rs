use crate::backoff::Backoff;
use crate::connection::ConnectionSupervisor;
use crate::consumer::{ConsumerConfig, MessageHandler, SingleMessageConsumer};
use crate::error::{AmqpError, Result};
use crate::message::{MessageProperties, Payload, QueueSpec, DEFAULT_ROUTING_KEY};
use crate::producer::Producer;
use async_trait::async_trait;
use chrono::Utc;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use lapin::Channel;
use rand::{distr::Alphanumeric, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, OnceCell};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcOptions {
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Parallel reply handling; sets the reply consumer's prefetch.
    pub concurrency: u16,
}

impl Default for RpcOptions {
    fn default() -> Self {
        RpcOptions {
            timeout_secs: 30,
            concurrency: 20,
        }
    }
}

/// Correlation-id → pending reply slot. Exactly one of {matching reply,
/// timeout, send failure} resolves an entry; after either, the entry is
/// gone and late or duplicate replies are dropped.
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<Payload>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        PendingCalls {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, correlation_id: &str) -> oneshot::Receiver<Payload> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .unwrap()
            .insert(correlation_id.to_string(), tx);
        rx
    }

    /// Deliver a reply to its pending call. Returns false when no call is
    /// waiting (late reply, duplicate, or foreign correlation id).
    pub(crate) fn resolve(&self, correlation_id: &str, reply: Payload) -> bool {
        let sender = self.inner.lock().unwrap().remove(correlation_id);
        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    pub(crate) fn remove(&self, correlation_id: &str) -> bool {
        self.inner.lock().unwrap().remove(correlation_id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// One deadline covers the request send and the reply wait. A publish error
/// rejects immediately as a send failure; the deadline elapsing rejects as a
/// timeout regardless of which phase was still running.
async fn send_then_wait(
    deadline: Duration,
    send: impl std::future::Future<Output = Result<()>>,
    reply_rx: oneshot::Receiver<Payload>,
) -> Result<Payload> {
    tokio::time::timeout(deadline, async {
        if let Err(err) = send.await {
            return Err(AmqpError::RpcSendFailure(err.to_string()));
        }
        reply_rx
            .await
            .map_err(|_| AmqpError::RpcSendFailure("reply channel closed".to_string()))
    })
    .await
    .map_err(|_| AmqpError::RpcTimeout(deadline))?
}

struct ReplyHandler {
    pending: Arc<PendingCalls>,
}

#[async_trait]
impl MessageHandler for ReplyHandler {
    async fn handle(&self, delivery: Delivery, _channel: Channel) -> Result<()> {
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string());

        match correlation_id {
            Some(id) => {
                let reply = Payload::from_bytes(&delivery.data);
                if !self.pending.resolve(&id, reply) {
                    debug!(correlation_id = %id, "dropping late or unknown rpc reply");
                }
            }
            None => warn!("rpc reply without correlation id"),
        }

        delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| AmqpError::AckError(e.to_string()))?;
        Ok(())
    }
}

/// Request/response over one-way queues: pairs a producer with a private,
/// exclusive reply queue and matches replies to calls by correlation id.
/// Initialization is lazy; calls issued before the target exchange exists
/// wait instead of failing.
pub struct RpcClient {
    name: String,
    reply_queue: String,
    options: RpcOptions,
    supervisor: Arc<ConnectionSupervisor>,
    producer: Producer,
    pending: Arc<PendingCalls>,
    ready: OnceCell<()>,
    reply_consumer: Mutex<Option<SingleMessageConsumer>>,
}

impl RpcClient {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        name: &str,
        options: RpcOptions,
    ) -> Arc<Self> {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(5)
            .map(char::from)
            .collect();
        let reply_queue = format!("{}-rpc-client-{}", name, suffix);
        let producer = Producer::new(Arc::clone(&supervisor));

        Arc::new(RpcClient {
            name: name.to_string(),
            reply_queue,
            options,
            supervisor,
            producer,
            pending: Arc::new(PendingCalls::new()),
            ready: OnceCell::new(),
            reply_consumer: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &RpcOptions {
        &self.options
    }

    /// Wire the reply consumer and wait for the target exchange. Runs once;
    /// concurrent callers all wait on the same initialization.
    async fn ensure_ready(&self) {
        self.ready
            .get_or_init(|| async {
                let handler = Arc::new(ReplyHandler {
                    pending: Arc::clone(&self.pending),
                });
                let config = ConsumerConfig {
                    queue: self.reply_queue.clone(),
                    batch_size: self.options.concurrency as usize,
                    batch_timeout: None,
                    queue_spec: QueueSpec {
                        durable: false,
                        exclusive: true,
                        ..QueueSpec::default()
                    },
                    binding: None,
                };
                let consumer = SingleMessageConsumer::start(
                    Arc::clone(&self.supervisor),
                    config,
                    handler,
                    None,
                );
                *self.reply_consumer.lock().unwrap() = Some(consumer);
                info!(service = %self.name, reply_queue = %self.reply_queue, "rpc client initialized");

                let mut backoff = Backoff::new(self.supervisor.base_delay());
                while !self.producer.is_exchange_available(&self.name).await {
                    let delay = backoff.next_delay();
                    info!(
                        exchange = %self.name,
                        delay_ms = delay.as_millis() as u64,
                        "waiting for rpc target exchange"
                    );
                    sleep(delay).await;
                }
            })
            .await;
    }

    /// Send a request and wait for its reply. Rejects with
    /// [`AmqpError::RpcTimeout`] after the configured timeout, or with
    /// [`AmqpError::RpcSendFailure`] immediately when the publish fails;
    /// either way the pending entry is cleaned up and a late reply is
    /// dropped.
    pub async fn call(&self, payload: &Payload, routing_key: &str) -> Result<Payload> {
        self.ensure_ready().await;

        let correlation_id = Uuid::new_v4().to_string();
        let reply_rx = self.pending.register(&correlation_id);

        let properties = MessageProperties {
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(self.reply_queue.clone()),
            timestamp: Some(Utc::now().timestamp() as u64),
        };

        // the deadline opens before the send; a slow publish eats into it
        let timeout = Duration::from_secs(self.options.timeout_secs);
        let send = self.producer.publish(&self.name, payload, routing_key, &properties);
        let result = send_then_wait(timeout, send, reply_rx).await;

        if result.is_err() {
            self.pending.remove(&correlation_id);
            if matches!(result, Err(AmqpError::RpcTimeout(_))) {
                warn!(service = %self.name, correlation_id = %correlation_id, "rpc call timed out");
            }
        }
        result
    }

    pub async fn call_default(&self, payload: &Payload) -> Result<Payload> {
        self.call(payload, DEFAULT_ROUTING_KEY).await
    }

    /// Fire-and-forget publish to the target exchange. Returns whether the
    /// publish succeeded; failures are logged, never thrown.
    pub async fn publish(&self, payload: &Payload, routing_key: &str) -> bool {
        self.ensure_ready().await;

        match self
            .producer
            .publish(&self.name, payload, routing_key, &MessageProperties::default())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(service = %self.name, error = %err, "fire-and-forget publish failed");
                false
            }
        }
    }

    /// Stop the private reply consumer. Pending calls run out via their
    /// timeouts.
    pub fn stop(&self) {
        let consumer = self.reply_consumer.lock().unwrap().take();
        if let Some(consumer) = consumer {
            consumer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reply_resolves_exactly_one_pending_call() {
        let pending = PendingCalls::new();
        let rx = pending.register("call-1");

        assert!(pending.resolve("call-1", Payload::from("done")));
        assert_eq!(rx.await.unwrap(), Payload::from("done"));

        // entry is gone: a duplicate reply is dropped
        assert!(!pending.resolve("call-1", Payload::from("again")));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn timed_out_call_cannot_be_resurrected() {
        let pending = PendingCalls::new();
        let rx = pending.register("call-2");

        // the timeout path removes the listener before rejecting
        assert!(pending.remove("call-2"));
        drop(rx);

        assert!(!pending.resolve("call-2", Payload::from(json!({"late": true}))));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_use_distinct_slots() {
        let pending = Arc::new(PendingCalls::new());

        let ids: Vec<String> = (0..64).map(|_| Uuid::new_v4().to_string()).collect();
        let receivers: Vec<_> = ids.iter().map(|id| pending.register(id)).collect();
        assert_eq!(pending.len(), 64);

        // resolving one call leaves every other call untouched
        assert!(pending.resolve(&ids[10], Payload::from("only this one")));
        assert_eq!(pending.len(), 63);

        for (index, rx) in receivers.into_iter().enumerate() {
            if index == 10 {
                assert_eq!(rx.await.unwrap(), Payload::from("only this one"));
            } else {
                pending.remove(&ids[index]);
            }
        }
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_counts_against_the_call_deadline() {
        let pending = PendingCalls::new();
        let reply_rx = pending.register("call-slow");

        let send = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), AmqpError>(())
        };
        let result = send_then_wait(Duration::from_secs(2), send, reply_rx).await;
        assert!(matches!(result, Err(AmqpError::RpcTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_rejects_without_waiting_out_the_deadline() {
        let pending = PendingCalls::new();
        let reply_rx = pending.register("call-unsendable");

        let started = tokio::time::Instant::now();
        let send = async { Err::<(), AmqpError>(AmqpError::PublishError("no channel".to_string())) };
        let result = send_then_wait(Duration::from_secs(30), send, reply_rx).await;

        assert!(matches!(result, Err(AmqpError::RpcSendFailure(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_within_the_deadline_resolves_after_a_slow_send() {
        let pending = Arc::new(PendingCalls::new());
        let reply_rx = pending.register("call-late-but-fine");

        let resolver = Arc::clone(&pending);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            resolver.resolve("call-late-but-fine", Payload::from("made it"));
        });

        let send = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), AmqpError>(())
        };
        let result = send_then_wait(Duration::from_secs(5), send, reply_rx).await;
        assert_eq!(result.unwrap(), Payload::from("made it"));
    }

    #[test]
    fn correlation_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(Uuid::new_v4().to_string()));
        }
    }

    #[test]
    fn options_hash_distinguishes_configurations() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let hash = |options: &RpcOptions| {
            let mut hasher = DefaultHasher::new();
            options.hash(&mut hasher);
            hasher.finish()
        };

        let base = RpcOptions::default();
        let slower = RpcOptions {
            timeout_secs: 60,
            ..RpcOptions::default()
        };
        assert_eq!(hash(&base), hash(&RpcOptions::default()));
        assert_ne!(hash(&base), hash(&slower));
    }
}
