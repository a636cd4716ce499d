//! 消息路由：脚本转换或直接解析 JSON / 数值，再交给标准化器。

use domain::{Datapoint, DatapointValue, Message, Reading};
use mqs_config::PluginConfig;
use mqs_normalize::{NormalizeOptions, Normalizer};
use mqs_script::{ScriptBridge, TransformResult};
use mqs_telemetry::record_message_dropped;
use serde_json::Value;
use tracing::{debug, info, warn};

/// 脚本配置与待重载标记。
struct ScriptSlot {
    bridge: ScriptBridge,
    path: String,
    content: String,
    reload_pending: bool,
}

/// 单个插件实例的消息路由器；由实例锁保护。
pub struct MessageRouter {
    name: String,
    asset: String,
    topic: String,
    normalizer: Normalizer,
    script: Option<ScriptSlot>,
    bridge_factory: fn(&str) -> ScriptBridge,
}

impl MessageRouter {
    pub fn new(config: &PluginConfig) -> Self {
        Self::with_bridge_factory(config, |name| ScriptBridge::new(name))
    }

    /// 指定脚本桥的构造方式（测试中使用独立引擎）。
    pub fn with_bridge_factory(config: &PluginConfig, bridge_factory: fn(&str) -> ScriptBridge) -> Self {
        let mut router = Self {
            name: config.name.clone(),
            asset: config.asset.clone(),
            topic: config.topic.clone(),
            normalizer: Normalizer::new(NormalizeOptions::from_config(config)),
            script: None,
            bridge_factory,
        };
        router.apply_script(config);
        router
    }

    pub fn is_scripted(&self) -> bool {
        self.script.is_some()
    }

    pub fn reload_pending(&self) -> bool {
        self.script.as_ref().is_some_and(|slot| slot.reload_pending)
    }

    pub fn bridge(&self) -> Option<&ScriptBridge> {
        self.script.as_ref().map(|slot| &slot.bridge)
    }

    /// 重新读取资产名、主题、标准化参数与脚本配置。
    ///
    /// 脚本路径或内容变化时只设置待重载标记，下一条消息处理前再重载。
    pub fn reconfigure(&mut self, config: &PluginConfig) {
        self.name = config.name.clone();
        self.asset = config.asset.clone();
        self.topic = config.topic.clone();
        self.normalizer
            .set_options(NormalizeOptions::from_config(config));
        self.apply_script(config);
    }

    fn apply_script(&mut self, config: &PluginConfig) {
        if !config.has_script() {
            if self.script.take().is_some() {
                info!(target: "mqs.ingest", instance = %self.name, "script_disabled");
            }
            return;
        }
        let path = config.script_path.clone().unwrap_or_default();
        match self.script.as_mut() {
            Some(slot) => {
                if slot.path != path || slot.content != config.script_content {
                    info!(target: "mqs.ingest", instance = %self.name, script = %path, "script_changed");
                    slot.path = path;
                    slot.content = config.script_content.clone();
                    slot.reload_pending = true;
                }
            }
            None => {
                self.script = Some(ScriptSlot {
                    bridge: (self.bridge_factory)(&self.name),
                    path,
                    content: config.script_content.clone(),
                    reload_pending: true,
                });
            }
        }
    }

    /// 执行待处理的脚本重载；失败进入脚本桥的失败锁定状态。
    pub fn reload_if_pending(&mut self) {
        let Some(slot) = self.script.as_mut() else {
            return;
        };
        if !slot.reload_pending {
            return;
        }
        slot.reload_pending = false;
        if let Err(err) = slot.bridge.load_script(&slot.path) {
            warn!(
                target: "mqs.ingest",
                instance = %self.name,
                script = %slot.path,
                error = %err,
                "script_reload_failed"
            );
        }
    }

    /// 处理一条消息，返回需要转发的读数。
    pub fn process(&mut self, message: &Message) -> Vec<Reading> {
        let text = message.payload_text();
        debug!(
            target: "mqs.ingest",
            instance = %self.name,
            topic = %message.topic,
            bytes = message.payload.len(),
            "message_received"
        );
        if self.script.is_some() {
            return self.process_scripted(&text, &message.topic);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(document)) => self.normalizer.normalize(&document, &self.asset),
            _ => match parse_numeric(&text) {
                Some(value) => vec![Reading::new(
                    self.asset.as_str(),
                    vec![Datapoint::new(self.topic.as_str(), DatapointValue::Float(value))],
                )],
                None => {
                    record_message_dropped();
                    warn!(
                        target: "mqs.ingest",
                        instance = %self.name,
                        topic = %message.topic,
                        payload = %text,
                        "payload_unrecognised"
                    );
                    Vec::new()
                }
            },
        }
    }

    fn process_scripted(&mut self, text: &str, topic: &str) -> Vec<Reading> {
        self.reload_if_pending();
        let Some(slot) = self.script.as_mut() else {
            return Vec::new();
        };
        let result = slot.bridge.execute(text, topic);
        match &result {
            TransformResult::Mapping(document) | TransformResult::Pair { document, .. } => {
                if document.is_empty() {
                    return Vec::new();
                }
                let asset = result.asset().unwrap_or(self.asset.as_str());
                self.normalizer.normalize(document, asset)
            }
            TransformResult::Empty | TransformResult::Failure(_) => Vec::new(),
        }
    }
}

/// 整个 payload 是否为单个数值：仅数字、可选前导 `-`、至多一个 `.`。
fn parse_numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    let mut dots = 0;
    let mut has_digit = false;
    for byte in digits.bytes() {
        match byte {
            b'0'..=b'9' => has_digit = true,
            b'.' => dots += 1,
            _ => return None,
        }
    }
    if !has_digit || dots > 1 {
        return None;
    }
    text.parse::<f64>().ok()
}
