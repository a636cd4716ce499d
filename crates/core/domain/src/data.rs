/// Broker 投递的原始消息（一次回调一条）。
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// 以文本形式读取 payload（非 UTF-8 字节按替换字符处理）。
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// 数据点的值类型。
#[derive(Debug, Clone, PartialEq)]
pub enum DatapointValue {
    Integer(i64),
    Float(f64),
    String(String),
    Nested(Vec<Datapoint>),
}

/// 读数中的单个数据点。
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub name: String,
    pub value: DatapointValue,
}

impl Datapoint {
    pub fn new(name: impl Into<String>, value: DatapointValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// 规范化后的读数。
///
/// 同名数据点不做去重，由下游消费方决定覆盖语义。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub asset_name: String,
    pub datapoints: Vec<Datapoint>,
    /// 用户时间戳（规范格式）；为空时由下游使用接收时间。
    pub user_ts: Option<String>,
}

impl Reading {
    pub fn new(asset_name: impl Into<String>, datapoints: Vec<Datapoint>) -> Self {
        Self {
            asset_name: asset_name.into(),
            datapoints,
            user_ts: None,
        }
    }

    pub fn with_user_ts(mut self, user_ts: Option<String>) -> Self {
        self.user_ts = user_ts;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// 按名称查找顶层数据点（返回最后一个同名点，与下游覆盖语义一致）。
    pub fn datapoint(&self, name: &str) -> Option<&DatapointValue> {
        self.datapoints
            .iter()
            .rev()
            .find(|point| point.name == name)
            .map(|point| &point.value)
    }
}
