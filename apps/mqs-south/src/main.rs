//! MQTT 南向采集进程：订阅 broker，经脚本/策略转换后把读数逐行输出到 stdout。

mod output;

use mqs_config::PluginConfig;
use mqs_ingest::{MqttBrokerFactory, ScriptedSubscriber};
use mqs_telemetry::{init_tracing, metrics};
use output::JsonLinesHandler;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 初始化结构化日志（输出到 stderr，stdout 留给读数）
    init_tracing();
    // 从环境变量加载插件配置
    let config = PluginConfig::from_env()?;
    info!(
        target: "mqs.ingest",
        instance = %config.name,
        broker = %config.broker,
        topic = %config.topic,
        asset = %config.asset,
        policy = config.policy.display_name(),
        script = config.script_path.as_deref().unwrap_or(""),
        "config_loaded"
    );

    let subscriber = ScriptedSubscriber::new(
        config,
        Arc::new(MqttBrokerFactory),
        Arc::new(JsonLinesHandler::stdout()),
    );
    // 后台连接，broker 不可达时也立即返回
    subscriber.start().await?;

    tokio::signal::ctrl_c().await?;
    info!(target: "mqs.ingest", "shutdown_requested");
    subscriber.stop().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "mqs.ingest",
        messages_received = snapshot.messages_received,
        readings_emitted = snapshot.readings_emitted,
        messages_dropped = snapshot.messages_dropped,
        transform_failures = snapshot.transform_failures,
        connections_lost = snapshot.connections_lost,
        "ingest_summary"
    );
    Ok(())
}
