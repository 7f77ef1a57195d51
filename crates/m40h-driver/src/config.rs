//! 链路配置

use m40h_serial::{SERIAL_SUBSTRING, TransportConfig};
use std::time::Duration;

/// 单次读/写超时
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(15);

/// 连续读错误超过该值后触发重连
pub const RECONNECT_ERROR_THRESHOLD: u32 = 100;

/// `release_device()` 等待 IO 线程退出的上限
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(3000);

/// 每个 ADC 端口的去抖历史长度（2 或 3）
pub const DEFAULT_ADC_HISTORY: usize = 2;

/// 未设置过亮度时，打开设备后写入的亮度
pub const DEFAULT_INTENSITY: u8 = 15;

/// 默认波特率（FT245 忽略）
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// 重连策略
///
/// 连续读错误超过阈值后，按指数退避最多尝试 `max_attempts` 次，全部失败则
/// 链路进入 Disconnected。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl ReconnectPolicy {
    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// 不重连，超过阈值直接断开
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

/// 链路配置（POD）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// 单次读/写超时（毫秒）
    pub io_timeout_ms: u64,
    /// 连续读错误阈值
    pub error_threshold: u32,
    /// 释放时等待 IO 线程的上限（毫秒）
    pub join_timeout_ms: u64,
    /// ADC 去抖历史长度
    pub adc_history: usize,
    /// 候选设备序列号必须包含的子串
    pub serial_filter: String,
    pub baud_rate: u32,
    pub reconnect: ReconnectPolicy,
}

impl LinkConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// 传输层参数
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            read_timeout_ms: self.io_timeout_ms,
            write_timeout_ms: self.io_timeout_ms,
            baud_rate: self.baud_rate,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            error_threshold: RECONNECT_ERROR_THRESHOLD,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT.as_millis() as u64,
            adc_history: DEFAULT_ADC_HISTORY,
            serial_filter: SERIAL_SUBSTRING.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
