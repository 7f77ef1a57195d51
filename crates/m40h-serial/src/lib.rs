//! # m40h Serial Transport Layer
//!
//! 设备传输抽象层：IO 循环只依赖 `Transport` / `Connector` 两个 trait，
//! 真实 USB 串口与测试用 Mock 都在此实现。

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use m40h_protocol::SHORT_LEN;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "serial")]
pub use serial::{SerialConnector, SerialPortTransport};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// 设备序列号中用于识别 40h 的子串
pub const SERIAL_SUBSTRING: &str = "m40h";

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Failed to open device {serial}: {message}")]
    Open { serial: String, message: String },
    #[error("Transport closed")]
    Closed,
    #[error("Backend error: {0}")]
    Backend(String),
}

/// 传输层参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// 单次读超时（毫秒）
    pub read_timeout_ms: u64,
    /// 单次写超时（毫秒）
    pub write_timeout_ms: u64,
    /// 波特率（FT245 类 FIFO 芯片忽略此值）
    pub baud_rate: u32,
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 15,
            write_timeout_ms: 15,
            baud_rate: 57_600,
        }
    }
}

/// 已打开的设备句柄
///
/// 所有方法取 `&self`：读写只由 IO 线程调用，但 `close()` 可以从任意线程
/// 调用，用于在 IO 线程卡住时强制关闭。
pub trait Transport: Send + Sync {
    /// 带超时读取一个完整的 2 字节消息
    ///
    /// - `Ok(Some(bytes))`: 读到完整消息
    /// - `Ok(None)`: 超时，未读到完整消息（部分字节由实现自行缓存）
    fn read_packet(&self) -> Result<Option<[u8; SHORT_LEN]>, TransportError>;

    /// 写入字节，返回实际写入的字节数（可能小于 `bytes.len()`）
    fn write(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// 关闭设备（幂等）
    fn close(&self);

    /// 设备序列号
    fn serial_number(&self) -> &str;
}

/// 共享的传输句柄
pub type SharedTransport = Arc<dyn Transport>;

/// 设备发现与打开
pub trait Connector: Send + Sync {
    /// 列出所有已连接设备的序列号（未过滤）
    fn enumerate(&self) -> Result<Vec<String>, TransportError>;

    /// 按序列号打开设备
    fn open(&self, serial: &str, config: &TransportConfig)
    -> Result<SharedTransport, TransportError>;
}

/// 过滤出序列号包含 `needle` 的候选设备（保持枚举顺序）
pub fn filter_candidates(serials: Vec<String>, needle: &str) -> Vec<String> {
    serials
        .into_iter()
        .filter(|serial| serial.contains(needle))
        .collect()
}
