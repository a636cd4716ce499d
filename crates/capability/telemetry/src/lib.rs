//! 日志初始化与采集计数。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub readings_emitted: u64,
    pub messages_dropped: u64,
    pub transform_failures: u64,
    pub transform_suppressed: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections_established: u64,
    pub connections_lost: u64,
}

/// 进程级采集指标。
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    readings_emitted: AtomicU64,
    messages_dropped: AtomicU64,
    transform_failures: AtomicU64,
    transform_suppressed: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    connections_established: AtomicU64,
    connections_lost: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            readings_emitted: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            transform_suppressed: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            readings_emitted: self.readings_emitted.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            transform_suppressed: self.transform_suppressed.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，输出到 stderr）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 记录收到的 MQTT 消息次数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录交给采集回调的读数条数。
pub fn record_reading_emitted() {
    metrics().readings_emitted.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法解析而丢弃的消息次数。
pub fn record_message_dropped() {
    metrics().messages_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录脚本转换失败次数。
pub fn record_transform_failure() {
    metrics().transform_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录脚本处于失败锁定状态时被跳过的次数。
pub fn record_transform_suppressed() {
    metrics()
        .transform_suppressed
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录连接尝试次数。
pub fn record_connect_attempt() {
    metrics().connect_attempts.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接失败次数。
pub fn record_connect_failure() {
    metrics().connect_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接（含订阅）成功次数。
pub fn record_connection_established() {
    metrics()
        .connections_established
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录连接丢失次数。
pub fn record_connection_lost() {
    metrics().connections_lost.fetch_add(1, Ordering::Relaxed);
}
