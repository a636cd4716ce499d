//! Broker 客户端抽象。
//!
//! 连接状态机只依赖这里的 trait，生产环境使用 [`crate::mqtt`] 中的 rumqttc 实现，
//! 测试中替换为可编排的假实现。

use async_trait::async_trait;
use domain::Message;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Broker 客户端错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to create client: {0}")]
    Create(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
    #[error("failed to disconnect: {0}")]
    Disconnect(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
}

/// 连接时使用的 TLS 文件（均为已解析的绝对路径）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub trust_store: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub key_password: Option<String>,
}

/// 单次连接的选项。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsFiles>,
}

/// 客户端回调：消息到达与连接丢失。
#[async_trait]
pub trait BrokerEvents: Send + Sync {
    async fn message_arrived(&self, message: Message);
    async fn connection_lost(&self, cause: String);
}

/// 单个 broker 会话句柄；销毁即释放。
#[async_trait]
pub trait BrokerClient: Send {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError>;
    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), BrokerError>;
    async fn disconnect(&mut self, timeout: Duration) -> Result<(), BrokerError>;
}

/// 客户端工厂（不做持久化会话）。
pub trait BrokerFactory: Send + Sync {
    fn create(
        &self,
        broker: &str,
        client_id: &str,
        queue_depth: usize,
        events: Arc<dyn BrokerEvents>,
    ) -> Result<Box<dyn BrokerClient>, BrokerError>;
}

/// 解析后的 broker 地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// 支持 `tcp://`、`mqtt://`、`ssl://`、`mqtts://` 前缀与裸 `host[:port]`。
    pub fn parse(value: &str) -> Result<Self, BrokerError> {
        let value = value.trim();
        let (tls, rest) = match value.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => (false, rest),
                "ssl" | "tls" | "mqtts" => (true, rest),
                other => {
                    return Err(BrokerError::Create(format!(
                        "unsupported broker scheme: {}",
                        other
                    )));
                }
            },
            None => (false, value),
        };
        let rest = rest.trim_end_matches('/');
        let default_port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| BrokerError::Create(format!("invalid broker port: {}", port)))?;
                (host, port)
            }
            None => (rest, default_port),
        };
        if host.is_empty() {
            return Err(BrokerError::Create(format!("missing broker host: {}", value)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}
