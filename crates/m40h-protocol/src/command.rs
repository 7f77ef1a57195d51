//! 主机命令定义与编码
//!
//! `Command` 是封闭的命令集合，`encode()` 为全函数：任意可构造的命令都编码为
//! 2/4/5 字节之一。参数范围检查由 `Command::validate()` 单独完成，编码时仅做
//! 半字节截断。

use crate::opcode::{MAX_COMMAND_LEN, Opcode};
use crate::{ADC_PORTS, GRID_SIZE, NibbleByte, PRESET_SLOTS, ProtocolError};

/// RGB 颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

/// 预设颜色组
///
/// 每组 16 个槽位，组 1 覆盖全局槽位 0-15，组 2 覆盖 16-31。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PresetGroup {
    One,
    Two,
}

impl PresetGroup {
    /// 将全局槽位号（0-31）拆分为 `(组, 组内槽位)`
    pub fn split(index: u8) -> Option<(PresetGroup, u8)> {
        match index {
            0..=15 => Some((PresetGroup::One, index)),
            16..=31 => Some((PresetGroup::Two, index - PRESET_SLOTS)),
            _ => None,
        }
    }

    fn update_opcode(self) -> Opcode {
        match self {
            PresetGroup::One => Opcode::UpdatePresetGroup1,
            PresetGroup::Two => Opcode::UpdatePresetGroup2,
        }
    }

    fn set_led_opcode(self) -> Opcode {
        match self {
            PresetGroup::One => Opcode::SetLedOnPresetGroup1,
            PresetGroup::Two => Opcode::SetLedOnPresetGroup2,
        }
    }
}

/// 主机 → 设备命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// 单个 LED 开关 (0x2)
    SetLed { row: u8, col: u8, on: bool },
    /// 单个 LED 以 RGB 点亮 (0x9)
    SetLedRgb { row: u8, col: u8, color: Rgb },
    /// 单个 LED 以预设颜色点亮 (0xB / 0xD)
    SetLedPreset {
        group: PresetGroup,
        slot: u8,
        row: u8,
        col: u8,
    },
    /// 更新预设槽位颜色 (0xA / 0xC)
    UpdatePresetColor {
        group: PresetGroup,
        slot: u8,
        color: Rgb,
    },
    /// 全局亮度 (0x3)
    SetLedIntensity { level: u8 },
    /// LED 自检图案 (0x4)
    TestLed { pattern: u8 },
    /// ADC 端口使能 (0x5)
    EnableAdc { port: u8, enable: bool },
    /// 关机/唤醒 (0x6)
    Shutdown { state: u8 },
    /// 整行设置，`columns` 的 Bit N 对应第 N 列 (0x7)
    SetLedRow { row: u8, columns: u8 },
    /// 整列设置，`rows` 的 Bit N 对应第 N 行 (0x8)
    SetLedColumn { col: u8, rows: u8 },
}

/// 编码后的命令
///
/// 固定 5 字节缓冲，避免堆分配；`len` 为有效长度（2、4 或 5）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; MAX_COMMAND_LEN],
    len: u8,
}

impl Packet {
    fn new(opcode: Opcode, payload: &[u8]) -> Self {
        let len = opcode.encoded_len();
        debug_assert_eq!(payload.len(), len);
        let mut bytes = [0u8; MAX_COMMAND_LEN];
        bytes[..len].copy_from_slice(&payload[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// 有效字节
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// 首字节中的操作码
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_header(self.bytes[0])
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Command {
    /// 命令对应的操作码
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::SetLed { .. } => Opcode::SetLed,
            Command::SetLedRgb { .. } => Opcode::SetLedRgbOn,
            Command::SetLedPreset { group, .. } => group.set_led_opcode(),
            Command::UpdatePresetColor { group, .. } => group.update_opcode(),
            Command::SetLedIntensity { .. } => Opcode::SetLedIntensity,
            Command::TestLed { .. } => Opcode::LedTest,
            Command::EnableAdc { .. } => Opcode::EnableAdc,
            Command::Shutdown { .. } => Opcode::Shutdown,
            Command::SetLedRow { .. } => Opcode::SetLedRow,
            Command::SetLedColumn { .. } => Opcode::SetLedColumn,
        }
    }

    /// 固定编码长度
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.opcode().encoded_len()
    }

    /// 检查各字段是否在硬件范围内
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match *self {
            Command::SetLed { row, col, .. } | Command::SetLedRgb { row, col, .. } => {
                check_grid(row, col)
            },
            Command::SetLedPreset { slot, row, col, .. } => {
                check("slot", slot, PRESET_SLOTS)?;
                check_grid(row, col)
            },
            Command::UpdatePresetColor { slot, .. } => check("slot", slot, PRESET_SLOTS),
            Command::EnableAdc { port, .. } => check("port", port, ADC_PORTS),
            Command::SetLedRow { row, .. } => check("row", row, GRID_SIZE),
            Command::SetLedColumn { col, .. } => check("col", col, GRID_SIZE),
            Command::SetLedIntensity { .. } | Command::TestLed { .. } | Command::Shutdown { .. } => {
                Ok(())
            },
        }
    }

    /// 编码为线上字节
    pub fn encode(&self) -> Packet {
        let op = self.opcode();
        let header = op.header();
        match *self {
            Command::SetLed { row, col, on } => {
                Packet::new(op, &[header | on as u8, NibbleByte::pack(col, row)])
            },
            Command::SetLedRgb { row, col, color } => {
                let [r, g, b] = color.to_bytes();
                Packet::new(op, &[header, NibbleByte::pack(col, row), r, g, b])
            },
            Command::SetLedPreset { slot, row, col, .. } => {
                Packet::new(op, &[header | (slot & 0x0F), NibbleByte::pack(col, row)])
            },
            Command::UpdatePresetColor { slot, color, .. } => {
                let [r, g, b] = color.to_bytes();
                Packet::new(op, &[header | (slot & 0x0F), r, g, b])
            },
            Command::SetLedIntensity { level } => Packet::new(op, &[header, level]),
            Command::TestLed { pattern } => Packet::new(op, &[header, pattern]),
            Command::EnableAdc { port, enable } => {
                Packet::new(op, &[header | (port & 0x0F), enable as u8])
            },
            Command::Shutdown { state } => Packet::new(op, &[header, state]),
            Command::SetLedRow { row, columns } => Packet::new(op, &[header | (row & 0x0F), columns]),
            Command::SetLedColumn { col, rows } => Packet::new(op, &[header | (col & 0x0F), rows]),
        }
    }
}

/// 编码命令（`Command::encode` 的函数形式）
#[inline]
pub fn encode(command: &Command) -> Packet {
    command.encode()
}

fn check(field: &'static str, value: u8, limit: u8) -> Result<(), ProtocolError> {
    if value < limit {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value: value as u16,
            max: (limit - 1) as u16,
        })
    }
}

fn check_grid(row: u8, col: u8) -> Result<(), ProtocolError> {
    check("row", row, GRID_SIZE)?;
    check("col", col, GRID_SIZE)
}
