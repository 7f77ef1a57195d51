//! 链路状态
//!
//! IO 线程写入，应用线程通过 `DeviceLink::state()` 读取。

use std::sync::atomic::{AtomicU8, Ordering};

/// 链路状态机
///
/// ```text
/// Disconnected -> Acquiring -> Connected <-> ErrorCounting -> Reconnecting
///      ^              |                                          |   |
///      +--------------+------------------------------------------+   |
///                                            Connected <-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LinkState {
    #[default]
    Disconnected = 0,
    /// 正在打开设备
    Acquiring = 1,
    Connected = 2,
    /// 出现读错误，尚未达到重连阈值
    ErrorCounting = 3,
    /// 正在关闭并重新打开设备
    Reconnecting = 4,
}

impl LinkState {
    /// 从 u8 转换，无效值视为 Disconnected
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Acquiring,
            2 => Self::Connected,
            3 => Self::ErrorCounting,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否持有打开的设备
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::ErrorCounting)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Acquiring => "acquiring",
            Self::Connected => "connected",
            Self::ErrorCounting => "error-counting",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// 链路状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLinkState {
    inner: AtomicU8,
}

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 仅当当前状态为 `current` 时切换到 `new`
    pub fn transition(&self, current: LinkState, new: LinkState) -> bool {
        self.inner
            .compare_exchange(
                current.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
