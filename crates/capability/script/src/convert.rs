//! convert 返回值的分类与文档转换。

use rhai::{Array, Blob, Dynamic, Map};
use serde_json::{Number, Value};
use tracing::warn;

/// 脚本转换得到的文档（成员按键有序）。
pub type Document = serde_json::Map<String, Value>;

/// 一次 convert 调用的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    /// 返回对象，资产名使用默认值。
    Mapping(Document),
    /// 返回 `[资产名, 对象或 ()]`。
    Pair { asset: String, document: Document },
    /// 无数据（返回 `()`，或脚本处于失败锁定状态）。
    Empty,
    /// 调用失败或返回值不符合约定。
    Failure(String),
}

impl TransformResult {
    /// 有效文档（仅 Mapping 与 Pair）。
    pub fn document(&self) -> Option<&Document> {
        match self {
            TransformResult::Mapping(document) => Some(document),
            TransformResult::Pair { document, .. } => Some(document),
            TransformResult::Empty | TransformResult::Failure(_) => None,
        }
    }

    /// 脚本指定的资产名。
    pub fn asset(&self) -> Option<&str> {
        match self {
            TransformResult::Pair { asset, .. } => Some(asset),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TransformResult::Failure(_))
    }
}

/// 将 convert 的返回值归类为 [`TransformResult`]。
pub fn classify(value: Dynamic) -> TransformResult {
    let value = value.flatten();
    if value.is_unit() {
        return TransformResult::Empty;
    }
    if value.is_map() {
        return match value.try_cast::<Map>() {
            Some(map) => TransformResult::Mapping(to_document(map)),
            None => TransformResult::Failure("convert returned an unreadable object map".to_string()),
        };
    }
    if value.is_array() {
        return match value.try_cast::<Array>() {
            Some(items) => classify_pair(items),
            None => TransformResult::Failure("convert returned an unreadable array".to_string()),
        };
    }
    TransformResult::Failure(format!(
        "convert returned {}, expected an object map or an [asset, object map] pair",
        value.type_name()
    ))
}

fn classify_pair(items: Array) -> TransformResult {
    if items.len() != 2 {
        return TransformResult::Failure(format!(
            "convert returned an array of {} elements, expected [asset, object map]",
            items.len()
        ));
    }
    let mut items = items.into_iter().map(Dynamic::flatten);
    let (Some(asset), Some(data)) = (items.next(), items.next()) else {
        return TransformResult::Failure("convert returned an incomplete pair".to_string());
    };
    if !asset.is_string() {
        return TransformResult::Failure(format!(
            "first element of the returned pair is {}, expected an asset name string",
            asset.type_name()
        ));
    }
    let asset = match asset.into_string() {
        Ok(asset) => asset,
        Err(type_name) => {
            return TransformResult::Failure(format!(
                "asset name could not be read as a string ({})",
                type_name
            ));
        }
    };
    if asset.is_empty() {
        return TransformResult::Failure("convert returned an empty asset name".to_string());
    }
    if data.is_unit() {
        return TransformResult::Pair {
            asset,
            document: Document::new(),
        };
    }
    match data.try_cast::<Map>() {
        Some(map) => TransformResult::Pair {
            asset,
            document: to_document(map),
        },
        None => TransformResult::Failure(
            "second element of the returned pair must be an object map or ()".to_string(),
        ),
    }
}

/// 对象映射转换为文档；无法映射的成员逐个告警后跳过。
pub fn to_document(map: Map) -> Document {
    let mut document = Document::new();
    for (key, value) in map {
        if let Some(value) = to_value(key.as_str(), value) {
            document.insert(key.to_string(), value);
        }
    }
    document
}

fn to_value(key: &str, value: Dynamic) -> Option<Value> {
    let value = value.flatten();
    if let Ok(v) = value.as_int() {
        return Some(Value::Number(Number::from(v)));
    }
    if let Ok(v) = value.as_float() {
        let number = Number::from_f64(v);
        if number.is_none() {
            warn!(target: "mqs.script", key = %key, value = v, "transform_value_not_finite");
        }
        return number.map(Value::Number);
    }
    if value.is_string() {
        return value.into_string().ok().map(Value::String);
    }
    if value.is_blob() {
        return value
            .try_cast::<Blob>()
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    }
    if value.is_map() {
        return value
            .try_cast::<Map>()
            .map(|map| Value::Object(to_document(map)));
    }
    warn!(
        target: "mqs.script",
        key = %key,
        value_type = %value.type_name(),
        "transform_value_skipped"
    );
    None
}
