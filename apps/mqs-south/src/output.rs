//! 读数输出：每条读数写为一行 JSON。

use async_trait::async_trait;
use domain::{Datapoint, DatapointValue, Reading};
use mqs_ingest::{IngestError, ReadingHandler};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::io::Write;
use std::sync::Mutex;

/// 输出行格式。
#[derive(Debug, Serialize)]
pub struct ReadingLine {
    pub asset: String,
    /// 用户时间戳，缺省为接收时间（UTC）。
    pub timestamp: String,
    pub readings: Map<String, Value>,
}

impl ReadingLine {
    pub fn from_reading(reading: Reading) -> Self {
        let timestamp = reading.user_ts.clone().unwrap_or_else(|| {
            chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string()
        });
        Self {
            asset: reading.asset_name,
            timestamp,
            readings: to_object(reading.datapoints),
        }
    }
}

fn to_object(datapoints: Vec<Datapoint>) -> Map<String, Value> {
    datapoints
        .into_iter()
        .map(|point| (point.name, to_value(point.value)))
        .collect()
}

fn to_value(value: DatapointValue) -> Value {
    match value {
        DatapointValue::Integer(v) => Value::from(v),
        DatapointValue::Float(v) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
        DatapointValue::String(v) => Value::String(v),
        DatapointValue::Nested(points) => Value::Object(to_object(points)),
    }
}

/// 写入任意输出流的 JSON 行处理器。
pub struct JsonLinesHandler<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesHandler<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send + 'static> ReadingHandler for JsonLinesHandler<W> {
    async fn handle(&self, reading: Reading) -> Result<(), IngestError> {
        let line = serde_json::to_string(&ReadingLine::from_reading(reading))
            .map_err(|err| IngestError::Handler(err.to_string()))?;
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{}", line).map_err(|err| IngestError::Handler(err.to_string()))?;
        out.flush()
            .map_err(|err| IngestError::Handler(err.to_string()))
    }
}
