//! Broker 连接状态机。

use crate::broker::{BrokerClient, BrokerError, BrokerEvents, BrokerFactory, ConnectOptions, TlsFiles};
use crate::certs::CertificateStore;
use mqs_config::PluginConfig;
use mqs_telemetry::{record_connect_attempt, record_connect_failure, record_connection_established};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 客户端消息队列深度。
pub const QUEUE_DEPTH: usize = 100;

/// 断开连接的最长等待时间。
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 连接状态：`Failed -> Created -> Connected`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 无客户端句柄（未启动、创建失败或已停止）。
    Failed,
    /// 客户端已创建，尚未连接或连接已丢失。
    Created,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Failed => "failed",
            ConnectionState::Created => "created",
            ConnectionState::Connected => "connected",
        }
    }
}

/// 与连接相关的配置字段；任一字段变化都需要重建客户端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub broker: String,
    pub topic: String,
    pub qos: u8,
    pub client_id: String,
    /// client id 为随机生成（实例名为空）。
    pub generated_client_id: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_cert: Option<String>,
    pub client_cert: Option<String>,
    pub private_key: Option<String>,
    pub key_password: Option<String>,
}

impl ConnectionSettings {
    /// 实例名为空时生成随机 client id。
    pub fn from_config(config: &PluginConfig) -> Self {
        let generated_client_id = config.name.trim().is_empty();
        let client_id = if generated_client_id {
            format!("mqs-south-{}", uuid::Uuid::new_v4())
        } else {
            config.name.clone()
        };
        Self {
            broker: config.broker.clone(),
            topic: config.topic.clone(),
            qos: config.qos,
            client_id,
            generated_client_id,
            username: config.username.clone(),
            password: config.password.clone(),
            server_cert: config.server_cert.clone(),
            client_cert: config.client_cert.clone(),
            private_key: config.private_key.clone(),
            key_password: config.key_password.clone(),
        }
    }

    /// 比较时忽略随机生成的 client id。
    pub fn differs_from(&self, other: &ConnectionSettings) -> bool {
        let mut other = other.clone();
        if self.generated_client_id && other.generated_client_id {
            other.client_id = self.client_id.clone();
        }
        *self != other
    }
}

/// 单个插件实例的连接管理器；由实例锁保护。
pub struct ConnectionManager {
    factory: Arc<dyn BrokerFactory>,
    events: Arc<dyn BrokerEvents>,
    certs: CertificateStore,
    settings: ConnectionSettings,
    client: Option<Box<dyn BrokerClient>>,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn BrokerFactory>,
        events: Arc<dyn BrokerEvents>,
        certs: CertificateStore,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            factory,
            events,
            certs,
            settings,
            client: None,
            state: ConnectionState::Failed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// 创建客户端句柄；失败时状态保持 `Failed`。
    pub fn create_client(&mut self) -> Result<(), BrokerError> {
        self.client = None;
        self.state = ConnectionState::Failed;
        let client = self.factory.create(
            &self.settings.broker,
            &self.settings.client_id,
            QUEUE_DEPTH,
            Arc::clone(&self.events),
        )?;
        self.client = Some(client);
        self.state = ConnectionState::Created;
        debug!(
            target: "mqs.connection",
            broker = %self.settings.broker,
            client_id = %self.settings.client_id,
            "client_created"
        );
        Ok(())
    }

    /// 单次连接并订阅，不做重试。
    pub async fn reconnect(&mut self) -> Result<(), BrokerError> {
        let options = self.connect_options();
        let settings = &self.settings;
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| BrokerError::Connect("client has not been created".to_string()))?;

        record_connect_attempt();
        let outcome = async {
            client.connect(&options).await?;
            client.subscribe(&settings.topic, settings.qos).await
        }
        .await;
        match outcome {
            Ok(()) => {
                record_connection_established();
                self.state = ConnectionState::Connected;
                info!(
                    target: "mqs.connection",
                    broker = %settings.broker,
                    topic = %settings.topic,
                    "broker_subscribed"
                );
                Ok(())
            }
            Err(err) => {
                record_connect_failure();
                Err(err)
            }
        }
    }

    /// 连接丢失：回到 `Created`，客户端句柄保留用于重连。
    pub fn mark_lost(&mut self) -> bool {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Created;
            return true;
        }
        false
    }

    /// 断开（有界等待）并销毁客户端，最终状态为 `Failed`。
    pub async fn stop(&mut self) {
        if let Some(mut client) = self.client.take() {
            if self.state == ConnectionState::Connected {
                if let Err(err) = client.disconnect(DISCONNECT_TIMEOUT).await {
                    warn!(target: "mqs.connection", error = %err, "broker_disconnect_failed");
                }
            }
            drop(client);
        }
        self.state = ConnectionState::Failed;
    }

    /// 未启动时直接替换连接配置。
    pub fn update_settings(&mut self, settings: ConnectionSettings) {
        self.settings = settings;
    }

    /// 应用新的连接配置；有变化时销毁并重建客户端，返回是否变化。
    pub async fn apply(&mut self, settings: ConnectionSettings) -> Result<bool, BrokerError> {
        if !self.settings.differs_from(&settings) {
            return Ok(false);
        }
        info!(
            target: "mqs.connection",
            broker = %settings.broker,
            topic = %settings.topic,
            "connection_settings_changed"
        );
        self.stop().await;
        self.settings = settings;
        self.create_client()?;
        Ok(true)
    }

    fn connect_options(&self) -> ConnectOptions {
        let settings = &self.settings;
        let tls = non_empty(&settings.server_cert).map(|server| TlsFiles {
            trust_store: self.certs.resolve(server),
            client_cert: non_empty(&settings.client_cert).map(|name| self.certs.resolve(name)),
            private_key: non_empty(&settings.private_key).map(|name| self.certs.resolve(name)),
            key_password: non_empty(&settings.key_password).map(str::to_string),
        });
        ConnectOptions {
            username: non_empty(&settings.username).map(str::to_string),
            password: non_empty(&settings.password).map(str::to_string),
            tls,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_client_ids_do_not_count_as_change() {
        let config = PluginConfig {
            name: String::new(),
            ..PluginConfig::default()
        };
        let first = ConnectionSettings::from_config(&config);
        let second = ConnectionSettings::from_config(&config);
        assert!(first.client_id.starts_with("mqs-south-"));
        assert_ne!(first.client_id, second.client_id);
        assert!(!first.differs_from(&second));

        let moved = ConnectionSettings::from_config(&PluginConfig {
            name: String::new(),
            topic: "other".to_string(),
            ..PluginConfig::default()
        });
        assert!(first.differs_from(&moved));
    }

    #[test]
    fn credential_change_is_detected() {
        let base = ConnectionSettings::from_config(&PluginConfig::default());
        let changed = ConnectionSettings::from_config(&PluginConfig {
            password: Some("secret".to_string()),
            ..PluginConfig::default()
        });
        assert!(base.differs_from(&changed));
        assert_eq!(base.client_id, mqs_config::DEFAULT_INSTANCE_NAME);
    }

    #[test]
    fn renaming_between_prefixed_names_is_detected() {
        let named = |name: &str| {
            ConnectionSettings::from_config(&PluginConfig {
                name: name.to_string(),
                ..PluginConfig::default()
            })
        };
        let first = named("mqs-south-a");
        assert!(!first.generated_client_id);
        assert!(first.differs_from(&named("mqs-south-b")));
        assert!(!first.differs_from(&named("mqs-south-a")));

        let generated = named("");
        assert!(generated.generated_client_id);
        assert!(first.differs_from(&generated));
        assert!(generated.differs_from(&first));
    }
}
