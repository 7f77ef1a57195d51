//! 设备输入事件解码
//!
//! 设备只上报两类 2 字节消息：按键（0x0）与 ADC（0x1）。其他操作码解码为
//! `Decoded::UnknownOpcode`，坐标超出 8x8 的按键解码为 `Decoded::OutOfGrid`，
//! 均由调用方记录日志后丢弃，不视为错误。

use crate::opcode::{Opcode, SHORT_LEN};
use crate::{ADC_MAX, GRID_SIZE, NibbleByte, ProtocolError};

/// 按键状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchEvent {
    pub row: u8,
    pub col: u8,
    pub pressed: bool,
}

/// ADC 采样变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdcEvent {
    /// 端口 0-3
    pub port: u8,
    /// 10 位采样值 0-1023
    pub value: u16,
}

/// 设备 → 主机输入事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputEvent {
    SwitchChanged(SwitchEvent),
    AdcChanged(AdcEvent),
}

impl InputEvent {
    /// 设备端编码
    ///
    /// 主机从不发送输入事件，此方法用于模拟设备和测试。
    pub fn to_bytes(&self) -> [u8; SHORT_LEN] {
        match *self {
            InputEvent::SwitchChanged(SwitchEvent { row, col, pressed }) => [
                Opcode::GetPress.header() | pressed as u8,
                NibbleByte::pack(col, row),
            ],
            InputEvent::AdcChanged(AdcEvent { port, value }) => {
                let value = value & ADC_MAX;
                [
                    Opcode::GetAdcVal.header() | ((port & 0x03) << 2) | (value >> 8) as u8,
                    (value & 0xFF) as u8,
                ]
            },
        }
    }
}

/// 解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Event(InputEvent),
    /// 首字节操作码不是输入操作码
    UnknownOpcode { raw: [u8; SHORT_LEN] },
    /// 按键消息的行或列不在 0-7
    OutOfGrid { raw: [u8; SHORT_LEN] },
}

/// 解码设备上报的 2 字节消息
pub fn decode(raw: [u8; SHORT_LEN]) -> Decoded {
    match Opcode::from_header(raw[0]) {
        Some(Opcode::GetPress) => {
            let (col, row) = NibbleByte::unpack(raw[1]);
            if row >= GRID_SIZE || col >= GRID_SIZE {
                return Decoded::OutOfGrid { raw };
            }
            Decoded::Event(InputEvent::SwitchChanged(SwitchEvent {
                row,
                col,
                pressed: raw[0] & 0x0F != 0,
            }))
        },
        Some(Opcode::GetAdcVal) => {
            let port = (raw[0] >> 2) & 0x03;
            let value = (((raw[0] & 0x03) as u16) << 8) | raw[1] as u16;
            Decoded::Event(InputEvent::AdcChanged(AdcEvent { port, value }))
        },
        _ => Decoded::UnknownOpcode { raw },
    }
}

/// 从任意切片解码（长度必须恰好为 2）
pub fn decode_slice(raw: &[u8]) -> Result<Decoded, ProtocolError> {
    let bytes: [u8; SHORT_LEN] = raw.try_into().map_err(|_| ProtocolError::InvalidLength {
        expected: SHORT_LEN,
        actual: raw.len(),
    })?;
    Ok(decode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_press() {
        assert_eq!(
            decode([0x01, 0x53]),
            Decoded::Event(InputEvent::SwitchChanged(SwitchEvent {
                row: 3,
                col: 5,
                pressed: true
            }))
        );
        assert_eq!(
            decode([0x00, 0x70]),
            Decoded::Event(InputEvent::SwitchChanged(SwitchEvent {
                row: 0,
                col: 7,
                pressed: false
            }))
        );
    }

    #[test]
    fn test_decode_adc() {
        // port 2, value 0x2FF
        assert_eq!(
            decode([0x1A, 0xFF]),
            Decoded::Event(InputEvent::AdcChanged(AdcEvent {
                port: 2,
                value: 0x2FF
            }))
        );
        assert_eq!(
            decode([0x1F, 0xFF]),
            Decoded::Event(InputEvent::AdcChanged(AdcEvent {
                port: 3,
                value: 1023
            }))
        );
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            decode([0xE1, 0x00]),
            Decoded::UnknownOpcode { raw: [0xE1, 0x00] }
        );
        // 主机命令操作码出现在输入流中同样视为未知
        assert_eq!(
            decode([0x21, 0x11]),
            Decoded::UnknownOpcode { raw: [0x21, 0x11] }
        );
    }

    #[test]
    fn test_decode_press_outside_grid() {
        assert_eq!(decode([0x01, 0x08]), Decoded::OutOfGrid { raw: [0x01, 0x08] });
        assert_eq!(decode([0x00, 0xF0]), Decoded::OutOfGrid { raw: [0x00, 0xF0] });
        // ADC 消息不受网格限制
        assert!(matches!(decode([0x1F, 0x00]), Decoded::Event(_)));
    }

    #[test]
    fn test_device_side_encoding() {
        let event = InputEvent::AdcChanged(AdcEvent {
            port: 1,
            value: 0x155,
        });
        assert_eq!(event.to_bytes(), [0x15, 0x55]);
        assert_eq!(decode(event.to_bytes()), Decoded::Event(event));
    }

    #[test]
    fn test_decode_slice_length() {
        assert!(decode_slice(&[0x01, 0x00]).is_ok());
        assert_eq!(
            decode_slice(&[0x01]).unwrap_err(),
            ProtocolError::InvalidLength {
                expected: 2,
                actual: 1
            }
        );
    }
}
