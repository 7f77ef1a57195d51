//! 操作码定义
//!
//! 操作码占首字节高 4 位，决定整条消息的固定长度。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 2 字节消息长度（所有输入事件及大多数命令）
pub const SHORT_LEN: usize = 2;

/// 4 字节消息长度（预设颜色更新）
pub const PRESET_COLOR_LEN: usize = 4;

/// 5 字节消息长度（RGB 点亮）
pub const RGB_LEN: usize = 5;

/// 最长命令长度
pub const MAX_COMMAND_LEN: usize = RGB_LEN;

/// 协议操作码（0-13）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// 按键状态（设备 → 主机）
    GetPress = 0,
    /// ADC 采样（设备 → 主机）
    GetAdcVal = 1,
    SetLed = 2,
    SetLedIntensity = 3,
    LedTest = 4,
    EnableAdc = 5,
    Shutdown = 6,
    SetLedRow = 7,
    SetLedColumn = 8,
    SetLedRgbOn = 9,
    UpdatePresetGroup1 = 10,
    SetLedOnPresetGroup1 = 11,
    /// 槽位 16-31
    UpdatePresetGroup2 = 12,
    SetLedOnPresetGroup2 = 13,
}

impl Opcode {
    /// 从首字节高 4 位解析操作码
    ///
    /// 14、15 等未定义的值返回 `None`。
    #[inline]
    pub fn from_header(byte: u8) -> Option<Self> {
        Self::try_from(byte >> 4).ok()
    }

    /// 该操作码消息的固定编码长度
    pub const fn encoded_len(self) -> usize {
        match self {
            Opcode::SetLedRgbOn => RGB_LEN,
            Opcode::UpdatePresetGroup1 | Opcode::UpdatePresetGroup2 => PRESET_COLOR_LEN,
            _ => SHORT_LEN,
        }
    }

    /// 是否为设备上报的输入操作码
    pub const fn is_input(self) -> bool {
        matches!(self, Opcode::GetPress | Opcode::GetAdcVal)
    }

    /// 首字节高 4 位
    #[inline]
    pub fn header(self) -> u8 {
        u8::from(self) << 4
    }
}
