//! 读数标准化：按嵌套策略把 JSON 文档展开为一条或多条读数。
//!
//! 成员按文档迭代顺序处理（JSON 报文为原始顺序，脚本结果为键排序），
//! 同名数据点不去重。

mod timestamp;

pub use timestamp::{CANONICAL_FORMAT, TimestampError, convert_timestamp};

use domain::{Datapoint, DatapointValue, Policy, Reading};
use mqs_config::PluginConfig;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// 待标准化的文档。
pub type Document = Map<String, Value>;

/// 标准化参数（随配置代次整体替换）。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    pub policy: Policy,
    pub timestamp_key: String,
    pub time_format: String,
    pub utc_offset_seconds: i64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            timestamp_key: mqs_config::DEFAULT_TIMESTAMP_KEY.to_string(),
            time_format: mqs_config::DEFAULT_TIME_FORMAT.to_string(),
            utc_offset_seconds: 0,
        }
    }
}

impl NormalizeOptions {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            policy: config.policy,
            timestamp_key: config.timestamp_key.clone(),
            time_format: config.time_format.clone(),
            utc_offset_seconds: config.utc_offset_seconds(),
        }
    }
}

/// 读数标准化器。
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizeOptions,
}

/// 正在构建的读数；时间戳取最浅层出现的一个。
#[derive(Default)]
struct ReadingBuilder {
    datapoints: Vec<Datapoint>,
    user_ts: Option<(usize, String)>,
}

impl ReadingBuilder {
    fn offer_ts(&mut self, depth: usize, ts: String) {
        match &self.user_ts {
            Some((current, _)) if *current <= depth => {}
            _ => self.user_ts = Some((depth, ts)),
        }
    }

    fn user_ts(&self) -> Option<String> {
        self.user_ts.as_ref().map(|(_, ts)| ts.clone())
    }

    fn finish(self, asset_name: &str, fallback_ts: Option<String>) -> Option<Reading> {
        if self.datapoints.is_empty() {
            return None;
        }
        let user_ts = self.user_ts.map(|(_, ts)| ts).or(fallback_ts);
        Some(Reading::new(asset_name, self.datapoints).with_user_ts(user_ts))
    }
}

impl Normalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: NormalizeOptions) {
        self.options = options;
    }

    /// 将文档转换为读数序列；不会产生空读数。
    ///
    /// 多读数策略下主读数（顶层标量，资产名 `asset_default`）在前，
    /// 其后为每个顶层嵌套对象各一条读数（资产名为对象的键）。
    pub fn normalize(&self, document: &Document, asset_default: &str) -> Vec<Reading> {
        let readings = match self.options.policy {
            Policy::FirstLevelOnly => {
                let mut builder = ReadingBuilder::default();
                self.collect_top_level(document, &mut builder, None);
                builder.finish(asset_default, None).into_iter().collect()
            }
            Policy::CollapseSingle | Policy::NestSingle => {
                let mut builder = ReadingBuilder::default();
                self.fill(document, 0, &mut builder);
                builder.finish(asset_default, None).into_iter().collect()
            }
            Policy::CollapseMultiple | Policy::NestMultiple => {
                self.normalize_multiple(document, asset_default)
            }
        };
        debug!(
            target: "mqs.normalize",
            asset = %asset_default,
            policy = self.options.policy.identifier(),
            members = document.len(),
            readings = readings.len(),
            "document_normalized"
        );
        readings
    }

    fn normalize_multiple(&self, document: &Document, asset_default: &str) -> Vec<Reading> {
        let mut primary = ReadingBuilder::default();
        let mut children = Vec::new();
        self.collect_top_level(document, &mut primary, Some(&mut children));

        // 子读数没有自己的时间戳时沿用顶层时间戳
        let inherited = primary.user_ts();
        let mut readings = Vec::with_capacity(children.len() + 1);
        readings.extend(primary.finish(asset_default, None));
        for (key, child) in children {
            let mut builder = ReadingBuilder::default();
            self.fill(child, 1, &mut builder);
            readings.extend(builder.finish(key, inherited.clone()));
        }
        readings
    }

    /// 只处理顶层成员；嵌套对象交给 `children`（为 None 时直接忽略）。
    fn collect_top_level<'a>(
        &self,
        document: &'a Document,
        builder: &mut ReadingBuilder,
        mut children: Option<&mut Vec<(&'a str, &'a Document)>>,
    ) {
        for (key, value) in document {
            if let Some(ts) = self.timestamp_member(key, value) {
                if let Some(ts) = ts {
                    builder.offer_ts(0, ts);
                }
                continue;
            }
            match value {
                Value::Object(child) => {
                    if let Some(children) = children.as_deref_mut() {
                        children.push((key.as_str(), child));
                    }
                }
                _ => {
                    if let Some(value) = scalar_value(key, value) {
                        builder.datapoints.push(Datapoint::new(key.as_str(), value));
                    }
                }
            }
        }
    }

    fn fill(&self, object: &Document, depth: usize, builder: &mut ReadingBuilder) {
        if self.options.policy.nests() {
            let datapoints = self.nested_points(object, depth, builder);
            builder.datapoints.extend(datapoints);
        } else {
            self.collapse_into(object, depth, builder);
        }
    }

    fn collapse_into(&self, object: &Document, depth: usize, builder: &mut ReadingBuilder) {
        for (key, value) in object {
            if let Some(ts) = self.timestamp_member(key, value) {
                if let Some(ts) = ts {
                    builder.offer_ts(depth, ts);
                }
                continue;
            }
            match value {
                Value::Object(child) => self.collapse_into(child, depth + 1, builder),
                _ => {
                    if let Some(value) = scalar_value(key, value) {
                        builder.datapoints.push(Datapoint::new(key.as_str(), value));
                    }
                }
            }
        }
    }

    fn nested_points(
        &self,
        object: &Document,
        depth: usize,
        builder: &mut ReadingBuilder,
    ) -> Vec<Datapoint> {
        let mut datapoints = Vec::with_capacity(object.len());
        for (key, value) in object {
            if let Some(ts) = self.timestamp_member(key, value) {
                if let Some(ts) = ts {
                    builder.offer_ts(depth, ts);
                }
                continue;
            }
            match value {
                Value::Object(child) => {
                    let inner = self.nested_points(child, depth + 1, builder);
                    if !inner.is_empty() {
                        datapoints.push(Datapoint::new(key.as_str(), DatapointValue::Nested(inner)));
                    }
                }
                _ => {
                    if let Some(value) = scalar_value(key, value) {
                        datapoints.push(Datapoint::new(key.as_str(), value));
                    }
                }
            }
        }
        datapoints
    }

    /// 字符串类型的时间戳成员：返回 `Some(转换结果)`，成员本身不再作为数据点。
    ///
    /// 转换失败时读数不带时间戳。
    fn timestamp_member(&self, key: &str, value: &Value) -> Option<Option<String>> {
        if key != self.options.timestamp_key {
            return None;
        }
        let Value::String(raw) = value else {
            return None;
        };
        match convert_timestamp(raw, &self.options.time_format, self.options.utc_offset_seconds) {
            Ok(ts) => Some(Some(ts)),
            Err(err) => {
                warn!(
                    target: "mqs.normalize",
                    key = %key,
                    value = %raw,
                    error = %err,
                    "timestamp_conversion_failed"
                );
                Some(None)
            }
        }
    }
}

/// JSON 标量转换为数据点值；布尔、null 与数组不支持。
fn scalar_value(key: &str, value: &Value) -> Option<DatapointValue> {
    match value {
        Value::Number(number) => {
            if let Some(v) = number.as_i64() {
                Some(DatapointValue::Integer(v))
            } else {
                number.as_f64().map(DatapointValue::Float)
            }
        }
        Value::String(text) => Some(DatapointValue::String(text.clone())),
        other => {
            debug!(
                target: "mqs.normalize",
                key = %key,
                value = %other,
                "datapoint_type_unsupported"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn normalizer(policy: Policy) -> Normalizer {
        Normalizer::new(NormalizeOptions {
            policy,
            ..NormalizeOptions::default()
        })
    }

    fn names(reading: &Reading) -> Vec<&str> {
        reading.datapoints.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn first_level_ignores_nested_objects() {
        let doc = document(json!({"a": 1, "inner": {"b": 2}, "c": "x"}));
        let readings = normalizer(Policy::FirstLevelOnly).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 1);
        assert_eq!(names(&readings[0]), vec!["a", "c"]);
    }

    #[test]
    fn collapse_hoists_nested_members_in_source_order() {
        let doc = document(json!({"a": 1, "inner": {"b": 2.5, "deep": {"a": 3}}}));
        let readings = normalizer(Policy::CollapseSingle).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 1);
        assert_eq!(names(&readings[0]), vec!["a", "b", "a"]);
        assert_eq!(readings[0].datapoint("a"), Some(&DatapointValue::Integer(3)));
        assert_eq!(readings[0].datapoint("b"), Some(&DatapointValue::Float(2.5)));
    }

    #[test]
    fn nest_keeps_structure() {
        let doc = document(json!({"a": 1, "inner": {"b": 2, "deep": {"c": "z"}}, "empty": {}}));
        let readings = normalizer(Policy::NestSingle).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 1);
        assert_eq!(names(&readings[0]), vec!["a", "inner"]);
        assert_eq!(
            readings[0].datapoint("inner"),
            Some(&DatapointValue::Nested(vec![
                Datapoint::new("b", DatapointValue::Integer(2)),
                Datapoint::new(
                    "deep",
                    DatapointValue::Nested(vec![Datapoint::new(
                        "c",
                        DatapointValue::String("z".to_string())
                    )])
                ),
            ]))
        );
    }

    #[test]
    fn nest_multiple_keeps_structure_inside_children() {
        let doc = document(json!({"room": {"temp": 21, "meta": {"floor": 2}}}));
        let readings = normalizer(Policy::NestMultiple).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].asset_name, "room");
        assert_eq!(names(&readings[0]), vec!["temp", "meta"]);
    }

    #[test]
    fn unsupported_values_are_skipped() {
        let doc = document(json!({"flag": true, "none": null, "list": [1, 2], "big": 18446744073709551615u64}));
        let readings = normalizer(Policy::CollapseSingle).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 1);
        assert_eq!(names(&readings[0]), vec!["big"]);
        assert!(matches!(readings[0].datapoint("big"), Some(DatapointValue::Float(_))));
    }

    #[test]
    fn empty_documents_produce_nothing() {
        for policy in Policy::ALL {
            let doc = document(json!({"flag": false, "nested": {}}));
            assert!(normalizer(policy).normalize(&doc, "mqtt").is_empty(), "{:?}", policy);
        }
    }

    #[test]
    fn timestamp_member_is_consumed_and_converted() {
        let doc = document(json!({"timestamp": "2024-03-01 10:00:00.125", "v": 1}));
        let readings = normalizer(Policy::FirstLevelOnly).normalize(&doc, "mqtt");
        assert_eq!(names(&readings[0]), vec!["v"]);
        assert_eq!(readings[0].user_ts.as_deref(), Some("2024-03-01 10:00:00.125"));
    }

    #[test]
    fn non_string_timestamp_stays_a_datapoint() {
        let doc = document(json!({"timestamp": 1700000000, "v": 1}));
        let readings = normalizer(Policy::FirstLevelOnly).normalize(&doc, "mqtt");
        assert_eq!(names(&readings[0]), vec!["timestamp", "v"]);
        assert!(readings[0].user_ts.is_none());
    }

    #[test]
    fn malformed_timestamp_leaves_reading_untimed() {
        let doc = document(json!({"timestamp": "soon", "v": 1}));
        let readings = normalizer(Policy::CollapseSingle).normalize(&doc, "mqtt");
        assert_eq!(names(&readings[0]), vec!["v"]);
        assert!(readings[0].user_ts.is_none());
    }

    #[test]
    fn shallowest_timestamp_wins_in_single_reading() {
        let doc = document(json!({
            "inner": {"timestamp": "2024-01-01 00:00:00", "b": 1},
            "timestamp": "2024-02-02 00:00:00"
        }));
        let readings = normalizer(Policy::CollapseSingle).normalize(&doc, "mqtt");
        assert_eq!(readings[0].user_ts.as_deref(), Some("2024-02-02 00:00:00"));
    }

    #[test]
    fn child_readings_use_own_or_inherited_timestamp() {
        let doc = document(json!({
            "timestamp": "2024-02-02 00:00:00",
            "a": {"timestamp": "2024-01-01 00:00:00", "v": 1},
            "b": {"v": 2}
        }));
        let readings = normalizer(Policy::CollapseMultiple).normalize(&doc, "mqtt");
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].asset_name, "a");
        assert_eq!(readings[0].user_ts.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(readings[1].asset_name, "b");
        assert_eq!(readings[1].user_ts.as_deref(), Some("2024-02-02 00:00:00"));
    }

    #[test]
    fn offset_comes_from_config() {
        let config = PluginConfig {
            timezone: "+02:00".to_string(),
            policy: Policy::NestSingle,
            ..PluginConfig::default()
        };
        let options = NormalizeOptions::from_config(&config);
        assert_eq!(options.utc_offset_seconds, 7_200);
        assert_eq!(options.policy, Policy::NestSingle);
    }
}
