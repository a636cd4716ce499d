//! MQTT 接入：连接状态机、消息路由与插件实例。

pub mod backoff;
pub mod broker;
pub mod certs;
pub mod connection;
pub mod mqtt;
pub mod router;
mod subscriber;

use async_trait::async_trait;
use domain::Reading;

pub use backoff::{Backoff, FailureLog, RetryPolicy};
pub use broker::{
    BrokerAddress, BrokerClient, BrokerError, BrokerEvents, BrokerFactory, ConnectOptions, TlsFiles,
};
pub use certs::CertificateStore;
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use mqtt::MqttBrokerFactory;
pub use router::MessageRouter;
pub use subscriber::{ScriptedSubscriber, SubscriberOptions};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("subscriber has not been started")]
    NotStarted,
    #[error("handler error: {0}")]
    Handler(String),
}

/// 读数处理器（下游接入回调）。
#[async_trait]
pub trait ReadingHandler: Send + Sync {
    async fn handle(&self, reading: Reading) -> Result<(), IngestError>;
}
