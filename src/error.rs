use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use std::time::Duration;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("broker connection error: {0}")]
    ConnectionError(String),

    #[error("channel error: {0}")]
    ChannelError(String),

    #[error("message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("publish error: {0}")]
    PublishError(String),

    #[error("consume error: {0}")]
    ConsumeError(String),

    #[error("acknowledge error: {0}")]
    AckError(String),

    #[error("rpc call timed out after {0:?}")]
    RpcTimeout(Duration),

    #[error("failed to send rpc request: {0}")]
    RpcSendFailure(String),
}

pub type Result<T> = std::result::Result<T, AmqpError>;

// Classify lapin errors by their display text; lapin does not expose a
// stable error taxonomy across protocol and IO failures.
impl From<LapinError> for AmqpError {
    fn from(error: LapinError) -> Self {
        let text = error.to_string();

        if text.contains("connection") {
            AmqpError::ConnectionError(text)
        } else if text.contains("channel") {
            AmqpError::ChannelError(text)
        } else if text.contains("publish") {
            AmqpError::PublishError(text)
        } else if text.contains("consume") {
            AmqpError::ConsumeError(text)
        } else if text.contains("ack") || text.contains("nack") {
            AmqpError::AckError(text)
        } else {
            AmqpError::ConnectionError(text)
        }
    }
}

impl From<Elapsed> for AmqpError {
    fn from(_: Elapsed) -> Self {
        AmqpError::ConnectionError("operation timed out".to_string())
    }
}
