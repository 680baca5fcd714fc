//! Resilience and pattern layer between application code and a RabbitMQ
//! connection: supervised connections and channels that survive broker
//! restarts, a batching consumer with a timeout-bounded window, and a
//! correlation-id RPC client over one-way queues.
//!
//! Application code depends on [`Producer`], the consumer variants, and
//! [`RpcClient`]; everything else is supervision machinery. Wire them up
//! through a [`BrokerRegistry`] owned by your composition root.

pub mod backoff;
pub mod batcher;
pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod registry;
pub mod rpc;
pub mod shutdown;

pub use backoff::Backoff;
pub use batcher::Batcher;
pub use channel::ChannelOwner;
pub use config::Config;
pub use connection::{ConnectionEvent, ConnectionState, ConnectionSupervisor};
pub use consumer::{
    BatchConsumer, BatchHandler, CleanupFn, ConsumerConfig, ConsumerState, MessageHandler,
    QueueStatus, SingleMessageConsumer,
};
pub use error::{AmqpError, Result};
pub use message::{
    ExchangeBinding, ExchangeType, MessageProperties, Payload, QueueSpec, DEFAULT_ROUTING_KEY,
};
pub use producer::Producer;
pub use registry::BrokerRegistry;
pub use rpc::{RpcClient, RpcOptions};
pub use shutdown::{ShutdownGuard, Stoppable};

// handler implementations work directly with lapin deliveries and channels
pub use lapin;

/// Install a process-wide tracing subscriber honoring `RUST_LOG`. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
