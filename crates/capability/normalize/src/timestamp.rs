//! 用户时间戳转换。

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// 规范输出格式（小数秒另行拼接）。
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 时间戳转换错误。
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp {value:?} does not match format {format:?}: {source}")]
    Format {
        value: String,
        format: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("timestamp {0:?} is out of range after applying the offset")]
    OutOfRange(String),
}

/// 将用户时间戳转换为规范格式。
///
/// 先在第一个 `.` 处拆出小数秒；整数部分按 `format` 解析（格式只含日期时按零点计），
/// 加上 `offset_seconds` 得到 UTC，再以 [`CANONICAL_FORMAT`] 输出并拼回小数秒。
pub fn convert_timestamp(
    value: &str,
    format: &str,
    offset_seconds: i64,
) -> Result<String, TimestampError> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    let local = parse_local(whole.trim(), format).map_err(|source| TimestampError::Format {
        value: value.to_string(),
        format: format.to_string(),
        source,
    })?;
    let utc = TimeDelta::try_seconds(offset_seconds)
        .and_then(|delta| local.checked_add_signed(delta))
        .ok_or_else(|| TimestampError::OutOfRange(value.to_string()))?;

    let mut converted = utc.format(CANONICAL_FORMAT).to_string();
    let fraction = fraction.trim();
    if !fraction.is_empty() {
        converted.push('.');
        converted.push_str(fraction);
    }
    Ok(converted)
}

fn parse_local(value: &str, format: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    match NaiveDateTime::parse_from_str(value, format) {
        Ok(parsed) => Ok(parsed),
        Err(err) => match NaiveDate::parse_from_str(value, format) {
            Ok(date) => Ok(date.and_time(NaiveTime::MIN)),
            Err(_) => Err(err),
        },
    }
}
