//! 插件实例：连接状态机、后台重连与消息处理的组合。
//!
//! 连接状态、客户端句柄、路由器与重连任务句柄都由同一把实例锁保护；
//! 脚本引擎的执行锁在实例锁之后获取。后台重连的退避睡眠不持有实例锁。

use crate::backoff::{Backoff, FailureLog, RetryPolicy};
use crate::broker::{BrokerEvents, BrokerFactory};
use crate::certs::CertificateStore;
use crate::connection::{ConnectionManager, ConnectionSettings, ConnectionState};
use crate::router::MessageRouter;
use crate::{IngestError, ReadingHandler};
use async_trait::async_trait;
use domain::{Message, Reading};
use mqs_config::PluginConfig;
use mqs_telemetry::{record_connection_lost, record_message_received, record_reading_emitted};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 实例构造参数。
pub struct SubscriberOptions {
    pub certs: CertificateStore,
    pub retry: RetryPolicy,
    pub router: MessageRouter,
}

impl SubscriberOptions {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            certs: CertificateStore::from_env(),
            retry: RetryPolicy::default(),
            router: MessageRouter::new(config),
        }
    }
}

struct Inner {
    config: PluginConfig,
    connection: ConnectionManager,
    router: MessageRouter,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Inner {
    /// 回收已结束的重连任务。
    fn reap_reconnect(&mut self) {
        if self.reconnect_task.as_ref().is_some_and(JoinHandle::is_finished) {
            self.reconnect_task = None;
            debug!(target: "mqs.connection", "reconnect_task_reaped");
        }
    }

    fn is_reconnecting(&self) -> bool {
        self.reconnect_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
    handler: Arc<dyn ReadingHandler>,
    retry: RetryPolicy,
}

/// broker 回调到实例的适配；持有弱引用，实例释放后回调自动失效。
struct InstanceEvents {
    shared: Weak<Shared>,
}

#[async_trait]
impl BrokerEvents for InstanceEvents {
    async fn message_arrived(&self, message: Message) {
        if let Some(shared) = self.shared.upgrade() {
            process(&shared, message).await;
        }
    }

    async fn connection_lost(&self, cause: String) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock().await;
        if inner.connection.state() == ConnectionState::Failed {
            return;
        }
        if inner.connection.mark_lost() {
            record_connection_lost();
        }
        warn!(
            target: "mqs.connection",
            instance = %shared.name,
            cause = %cause,
            "broker_connection_lost"
        );
        spawn_reconnect(&shared, &mut inner);
    }
}

/// MQTT 订阅插件实例。
pub struct ScriptedSubscriber {
    shared: Arc<Shared>,
}

impl ScriptedSubscriber {
    pub fn new(
        config: PluginConfig,
        factory: Arc<dyn BrokerFactory>,
        handler: Arc<dyn ReadingHandler>,
    ) -> Self {
        let options = SubscriberOptions::from_config(&config);
        Self::with_options(config, factory, handler, options)
    }

    pub fn with_options(
        config: PluginConfig,
        factory: Arc<dyn BrokerFactory>,
        handler: Arc<dyn ReadingHandler>,
        options: SubscriberOptions,
    ) -> Self {
        let settings = ConnectionSettings::from_config(&config);
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let events: Arc<dyn BrokerEvents> = Arc::new(InstanceEvents {
                shared: weak.clone(),
            });
            Shared {
                name: config.name.clone(),
                inner: Mutex::new(Inner {
                    connection: ConnectionManager::new(factory, events, options.certs, settings),
                    router: options.router,
                    reconnect_task: None,
                    config,
                }),
                handler,
                retry: options.retry,
            }
        });
        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 创建客户端并在后台连接；不等待连接完成。
    ///
    /// 只有客户端创建失败才返回错误，此时状态保持 `Failed`。
    pub async fn start(&self) -> Result<(), IngestError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.connection.state() != ConnectionState::Failed {
            debug!(target: "mqs.ingest", instance = %self.shared.name, "already_started");
            return Ok(());
        }
        inner.connection.create_client()?;
        inner.router.reload_if_pending();
        info!(
            target: "mqs.ingest",
            instance = %self.shared.name,
            broker = %inner.connection.settings().broker,
            topic = %inner.connection.settings().topic,
            scripted = inner.router.is_scripted(),
            "subscriber_started"
        );
        spawn_reconnect(&self.shared, &mut inner);
        Ok(())
    }

    /// 断开并销毁客户端。进行中的后台重连会在下一次取得实例锁时退出。
    pub async fn stop(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.connection.stop().await;
        inner.reap_reconnect();
        info!(target: "mqs.ingest", instance = %self.shared.name, "subscriber_stopped");
    }

    /// 同步的一次性连接尝试。
    pub async fn reconnect(&self) -> Result<(), IngestError> {
        let mut inner = self.shared.inner.lock().await;
        match inner.connection.state() {
            ConnectionState::Failed => Err(IngestError::NotStarted),
            ConnectionState::Connected => Ok(()),
            ConnectionState::Created => Ok(inner.connection.reconnect().await?),
        }
    }

    /// 应用新配置：连接相关字段变化时重建客户端并触发后台连接；
    /// 其余字段总是重新读取，脚本变化只标记待重载。
    pub async fn reconfigure(&self, config: PluginConfig) -> Result<(), IngestError> {
        let mut inner = self.shared.inner.lock().await;
        let settings = ConnectionSettings::from_config(&config);
        inner.router.reconfigure(&config);
        inner.config = config;
        if inner.connection.state() == ConnectionState::Failed {
            inner.connection.update_settings(settings);
        } else if inner.connection.apply(settings).await? {
            spawn_reconnect(&self.shared, &mut inner);
        }
        info!(target: "mqs.ingest", instance = %self.shared.name, "subscriber_reconfigured");
        Ok(())
    }

    /// 处理一条消息并把读数交给处理器。
    pub async fn process_message(&self, message: Message) {
        process(&self.shared, message).await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.connection.state()
    }

    /// 是否有后台重连任务在运行。
    pub async fn is_reconnecting(&self) -> bool {
        self.shared.inner.lock().await.is_reconnecting()
    }

    pub async fn config(&self) -> PluginConfig {
        self.shared.inner.lock().await.config.clone()
    }

    /// 当前脚本是否处于失败锁定状态（未配置脚本时为 None）。
    pub async fn script_failed(&self) -> Option<bool> {
        let inner = self.shared.inner.lock().await;
        inner.router.bridge().map(|bridge| bridge.is_failed())
    }
}

async fn process(shared: &Arc<Shared>, message: Message) {
    record_message_received();
    let readings = {
        let mut inner = shared.inner.lock().await;
        inner.reap_reconnect();
        inner.router.process(&message)
    };
    emit(shared, readings).await;
}

async fn emit(shared: &Shared, readings: Vec<Reading>) {
    for reading in readings {
        let asset = reading.asset_name.clone();
        match shared.handler.handle(reading).await {
            Ok(()) => record_reading_emitted(),
            Err(err) => warn!(
                target: "mqs.ingest",
                instance = %shared.name,
                asset = %asset,
                error = %err,
                "reading_handler_failed"
            ),
        }
    }
}

/// 启动后台重连；已有任务在运行时不重复启动。
fn spawn_reconnect(shared: &Arc<Shared>, inner: &mut Inner) {
    if inner.is_reconnecting() {
        debug!(target: "mqs.connection", instance = %shared.name, "reconnect_already_running");
        return;
    }
    inner.reap_reconnect();
    let weak = Arc::downgrade(shared);
    let retry = shared.retry;
    inner.reconnect_task = Some(tokio::spawn(reconnect_loop(weak, retry)));
}

/// 连接直到成功、实例停止或实例释放。
async fn reconnect_loop(shared: Weak<Shared>, retry: RetryPolicy) {
    let mut backoff = Backoff::from_policy(&retry);
    let mut failures = FailureLog::new(retry.report_interval);
    loop {
        let Some(instance) = shared.upgrade() else {
            return;
        };
        let delay = {
            let mut inner = instance.inner.lock().await;
            match inner.connection.state() {
                ConnectionState::Failed => {
                    debug!(target: "mqs.connection", instance = %instance.name, "reconnect_abandoned");
                    return;
                }
                ConnectionState::Connected => return,
                ConnectionState::Created => {}
            }
            match inner.connection.reconnect().await {
                Ok(()) => {
                    match failures.recovered() {
                        Some(count) => info!(
                            target: "mqs.connection",
                            instance = %instance.name,
                            failures = count,
                            "broker_connection_recovered"
                        ),
                        None => info!(
                            target: "mqs.connection",
                            instance = %instance.name,
                            "broker_connection_established"
                        ),
                    }
                    return;
                }
                Err(err) => {
                    let delay = backoff.next_sleep();
                    if failures.failed() {
                        warn!(
                            target: "mqs.connection",
                            instance = %instance.name,
                            attempt = backoff.attempt(),
                            failures = failures.failures(),
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "broker_connect_failed"
                        );
                    }
                    delay
                }
            }
        };
        drop(instance);
        tokio::time::sleep(delay).await;
    }
}
