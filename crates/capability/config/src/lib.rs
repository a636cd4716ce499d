//! 插件运行配置加载。

use domain::Policy;
use std::env;
use std::path::PathBuf;
use tracing::warn;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 订阅使用的 QoS（固定为 1）。
pub const MQTT_QOS: u8 = 1;

pub const DEFAULT_INSTANCE_NAME: &str = "mqtt-scripted";
pub const DEFAULT_TIMESTAMP_KEY: &str = "timestamp";
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_TIMEZONE: &str = "+00:00";

const FALLBACK_DATA_DIR: &str = "/usr/local/mqs/data";

/// 插件运行配置。
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub name: String,
    pub asset: String,
    pub broker: String,
    pub topic: String,
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 证书与私钥均为证书目录下的名称（不含 `.pem`）。
    pub server_cert: Option<String>,
    pub client_cert: Option<String>,
    pub private_key: Option<String>,
    pub key_password: Option<String>,
    pub policy: Policy,
    pub timestamp_key: String,
    pub time_format: String,
    pub timezone: String,
    pub script_path: Option<String>,
    /// 脚本内容，仅用于判断脚本是否变化。
    pub script_content: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            asset: "mqtt".to_string(),
            broker: "localhost".to_string(),
            topic: "sensor".to_string(),
            qos: MQTT_QOS,
            username: None,
            password: None,
            server_cert: None,
            client_cert: None,
            private_key: None,
            key_password: None,
            policy: Policy::default(),
            timestamp_key: DEFAULT_TIMESTAMP_KEY.to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            script_path: None,
            script_content: String::new(),
        }
    }
}

impl PluginConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let name = read_with_default("MQS_NAME", DEFAULT_INSTANCE_NAME);
        let asset = read_with_default("MQS_ASSET", "mqtt");
        let broker = read_with_default("MQS_BROKER", "localhost");
        let topic = read_with_default("MQS_TOPIC", "sensor");
        let username = read_optional("MQS_USERNAME");
        let password = read_optional("MQS_PASSWORD");
        let server_cert = read_optional("MQS_SERVER_CERT");
        let client_cert = read_optional("MQS_CLIENT_CERT");
        let private_key = read_optional("MQS_PRIVATE_KEY");
        let key_password = read_optional("MQS_KEY_PASSWORD");
        let policy = match read_optional("MQS_POLICY") {
            Some(value) => Policy::parse(&value)
                .ok_or_else(|| ConfigError::Invalid("MQS_POLICY".to_string(), value))?,
            None => Policy::default(),
        };
        let timestamp_key = read_with_default("MQS_TIMESTAMP_KEY", DEFAULT_TIMESTAMP_KEY);
        let time_format = read_with_default("MQS_TIME_FORMAT", DEFAULT_TIME_FORMAT);
        let timezone = read_with_default("MQS_TIMEZONE", DEFAULT_TIMEZONE);
        if parse_utc_offset(&timezone).is_none() {
            return Err(ConfigError::Invalid("MQS_TIMEZONE".to_string(), timezone));
        }
        let script_path = read_optional("MQS_SCRIPT");
        let script_content = match script_path.as_deref() {
            Some(path) => read_script_content(path),
            None => String::new(),
        };

        Ok(Self {
            name,
            asset,
            broker,
            topic,
            qos: MQTT_QOS,
            username,
            password,
            server_cert,
            client_cert,
            private_key,
            key_password,
            policy,
            timestamp_key,
            time_format,
            timezone,
            script_path,
            script_content,
        })
    }

    /// 是否配置了转换脚本（空值与 `""` 视为未配置）。
    pub fn has_script(&self) -> bool {
        matches!(self.script_path.as_deref(), Some(path) if !path.is_empty() && path != "\"\"")
    }

    /// 时区偏移（秒）；无法解析时为 0。
    pub fn utc_offset_seconds(&self) -> i64 {
        parse_utc_offset(&self.timezone).unwrap_or(0)
    }
}

/// 读取脚本内容用于变化检测；读取失败时记录告警并视为空内容。
pub fn read_script_content(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                target: "mqs.config",
                script = %path,
                error = %err,
                "script_content_unreadable"
            );
            String::new()
        }
    }
}

/// 解析 `±HH:MM` 或 `±HH` 形式的时区偏移，返回秒数。
///
/// 空字符串视为 0；符号缺省按正数处理。
pub fn parse_utc_offset(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0);
    }
    let (sign, rest) = match value.as_bytes()[0] {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => (1, value),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((hours, minutes)) => (hours, minutes),
        None => (rest, "0"),
    };
    if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !minutes.bytes().all(|b| b.is_ascii_digit()) || minutes.is_empty() {
        return None;
    }
    let hours = hours.parse::<i64>().ok()?;
    let minutes = minutes.parse::<i64>().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// 数据根目录：`MQS_DATA` 优先，其次 `$MQS_ROOT/data`，最后使用固定路径。
pub fn data_dir() -> PathBuf {
    if let Some(data) = read_optional("MQS_DATA") {
        return PathBuf::from(data);
    }
    if let Some(root) = read_optional("MQS_ROOT") {
        return PathBuf::from(root).join("data");
    }
    PathBuf::from(FALLBACK_DATA_DIR)
}

fn read_with_default(key: &str, default: &str) -> String {
    read_optional(key).unwrap_or_else(|| default.to_string())
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_offset_accepts_hours_and_minutes() {
        assert_eq!(parse_utc_offset("+05:30"), Some(19_800));
        assert_eq!(parse_utc_offset("-08"), Some(-28_800));
        assert_eq!(parse_utc_offset("-05:30"), Some(-19_800));
        assert_eq!(parse_utc_offset("02:00"), Some(7_200));
        assert_eq!(parse_utc_offset(""), Some(0));
    }

    #[test]
    fn utc_offset_rejects_garbage() {
        assert_eq!(parse_utc_offset("+5:xx"), None);
        assert_eq!(parse_utc_offset("UTC"), None);
        assert_eq!(parse_utc_offset("+25:00"), None);
        assert_eq!(parse_utc_offset("+01:"), None);
    }

    #[test]
    fn script_placeholder_counts_as_unset() {
        let mut config = PluginConfig::default();
        assert!(!config.has_script());
        config.script_path = Some("\"\"".to_string());
        assert!(!config.has_script());
        config.script_path = Some("/tmp/convert.rhai".to_string());
        assert!(config.has_script());
    }
}
