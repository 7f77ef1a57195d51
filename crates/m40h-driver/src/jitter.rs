//! ADC 去抖
//!
//! 电位器在两个相邻值之间来回跳动时，新采样若与最近 N 个已接受值中的任一
//! 相同则丢弃。每个端口一个小环形缓冲，不分配堆内存。

use m40h_protocol::ADC_PORTS;

/// 历史长度下限
pub const MIN_HISTORY: usize = 2;
/// 历史长度上限
pub const MAX_HISTORY: usize = 3;

#[derive(Debug, Clone, Copy)]
struct History {
    values: [u16; MAX_HISTORY],
    len: usize,
    next: usize,
}

impl History {
    const EMPTY: Self = Self {
        values: [0; MAX_HISTORY],
        len: 0,
        next: 0,
    };

    fn contains(&self, value: u16) -> bool {
        self.values[..self.len].contains(&value)
    }

    /// 写入新值，满时覆盖最旧的一个
    fn push(&mut self, value: u16, capacity: usize) {
        self.values[self.next] = value;
        self.next = (self.next + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }
}

/// 按端口独立的 ADC 去抖过滤器
#[derive(Debug, Clone)]
pub struct AdcJitterFilter {
    capacity: usize,
    ports: [History; ADC_PORTS as usize],
}

impl AdcJitterFilter {
    /// `history` 会被限制在 2..=3
    pub fn new(history: usize) -> Self {
        Self {
            capacity: history.clamp(MIN_HISTORY, MAX_HISTORY),
            ports: [History::EMPTY; ADC_PORTS as usize],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 处理一次采样
    ///
    /// 返回 `Some(value)` 表示应派发；`None` 表示与近期历史重复。
    /// 超出范围的端口不做过滤直接放行。
    pub fn observe(&mut self, port: u8, value: u16) -> Option<u16> {
        let Some(history) = self.ports.get_mut(port as usize) else {
            return Some(value);
        };
        if history.contains(value) {
            return None;
        }
        history.push(value, self.capacity);
        Some(value)
    }

    /// 清空全部历史（重新打开设备时调用）
    pub fn reset(&mut self) {
        self.ports = [History::EMPTY; ADC_PORTS as usize];
    }
}

impl Default for AdcJitterFilter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ADC_HISTORY)
    }
}
