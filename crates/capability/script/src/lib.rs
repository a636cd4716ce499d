//! # 脚本转换能力模块
//!
//! 用户提供一个 Rhai 脚本，定义入口函数 `convert(message, topic)`，
//! 把 MQTT 报文转换为数据点映射：
//!
//! ```rhai
//! fn convert(message, topic) {
//!     let parts = message.split(",");
//!     ["boiler", #{ temperature: parse_float(parts[0]), pressure: parse_int(parts[1]) }]
//! }
//! ```
//!
//! ## 返回值约定
//!
//! ```text
//! #{ ... }               -> Mapping（资产名使用配置默认值）
//! ["asset", #{ ... }]    -> Pair（资产名由脚本指定，不能为空）
//! ["asset", ()]          -> Pair（空文档）
//! ()                     -> Empty（本条消息无数据）
//! 其他                   -> Failure（进入失败锁定状态）
//! ```
//!
//! 引擎在进程内共享（[`ScriptEngine::shared`]），每次调用都在引擎执行锁内完成。

mod bridge;
mod convert;
mod engine;
mod error;

pub use bridge::{ENTRY_POINT, SUPPRESSED_REPORT_INTERVAL, ScriptBridge};
pub use convert::{Document, TransformResult, classify, to_document};
pub use engine::{EngineGuard, EngineState, SCRIPT_EXTENSION, ScriptEngine, module_identity};
pub use error::ScriptError;
