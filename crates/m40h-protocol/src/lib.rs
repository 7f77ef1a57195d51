//! # m40h Protocol
//!
//! 40h 按键/LED 网格控制器的串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `opcode`: 操作码与定长表
//! - `command`: 主机 → 设备命令及编码
//! - `event`: 设备 → 主机输入事件及解码
//!
//! ## 帧格式
//!
//! 每条消息首字节的高 4 位是操作码，其余位/字节按半字节（nibble）或整字节
//! 承载参数。主机命令长度固定为 2、4 或 5 字节；设备上报固定为 2 字节。

pub mod command;
pub mod event;
pub mod opcode;

pub use command::*;
pub use event::*;
pub use opcode::*;

use bilge::prelude::*;
use thiserror::Error;

/// 网格边长（8x8）
pub const GRID_SIZE: u8 = 8;

/// ADC 端口数量
pub const ADC_PORTS: u8 = 4;

/// 每个预设组的槽位数（两组共 32 个）
pub const PRESET_SLOTS: u8 = 16;

/// ADC 最大采样值（10 位）
pub const ADC_MAX: u16 = 0x03FF;

/// 协议错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Value {value} out of range for {field} (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },
}

/// 单字节的高/低半字节位域
///
/// bilge 默认 LSB first：第一个字段占 Bit 0-3，第二个字段占 Bit 4-7。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
pub struct NibbleByte {
    pub low: u4,  // Bit 0-3
    pub high: u4, // Bit 4-7
}

impl NibbleByte {
    /// 由高低半字节组装（超出 4 位的部分被截断）
    #[inline]
    pub fn pack(high: u8, low: u8) -> u8 {
        u8::from(NibbleByte::new(u4::new(low & 0x0F), u4::new(high & 0x0F)))
    }

    /// 拆分为 `(high, low)`
    #[inline]
    pub fn unpack(byte: u8) -> (u8, u8) {
        let nibbles = NibbleByte::from(byte);
        (nibbles.high().value(), nibbles.low().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nibble_pack() {
        assert_eq!(NibbleByte::pack(0x2, 0x1), 0x21);
        assert_eq!(NibbleByte::pack(0xF, 0x0), 0xF0);
        // 超出 4 位被截断
        assert_eq!(NibbleByte::pack(0x12, 0x34), 0x24);
    }

    #[test]
    fn test_nibble_unpack() {
        assert_eq!(NibbleByte::unpack(0x9C), (0x9, 0xC));
        assert_eq!(NibbleByte::unpack(0x00), (0x0, 0x0));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::OutOfRange {
            field: "row",
            value: 9,
            max: 7,
        };
        assert_eq!(err.to_string(), "Value 9 out of range for row (max 7)");

        let err = ProtocolError::InvalidLength {
            expected: 2,
            actual: 1,
        };
        assert!(err.to_string().contains("expected 2"));
    }
}
