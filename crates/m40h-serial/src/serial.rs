//! USB 串口后端（serialport）
//!
//! 设备以 FTDI USB-串口芯片出现在系统中，按 USB 序列号寻址。

use crate::{Connector, SHORT_LEN, SharedTransport, Transport, TransportConfig, TransportError};
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => TransportError::NotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                TransportError::Io(std::io::Error::new(kind, err.description))
            },
            _ => TransportError::Backend(err.description),
        }
    }
}

/// 读端状态：端口句柄加上一次读取被拆开时残留的首字节
struct ReadHalf {
    port: Box<dyn SerialPort>,
    pending: Option<u8>,
}

/// 基于 serialport 的传输实现
///
/// 读写使用两个独立句柄（`try_clone`），写端不会被阻塞中的读操作卡住。
pub struct SerialPortTransport {
    serial: String,
    port_name: String,
    reader: Mutex<Option<ReadHalf>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    closed: AtomicBool,
}

impl SerialPortTransport {
    /// 打开指定端口
    pub fn open(
        serial: &str,
        port_name: &str,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| TransportError::Open {
                serial: serial.to_string(),
                message: e.to_string(),
            })?;

        let mut writer = port.try_clone()?;
        writer.set_timeout(config.write_timeout())?;

        // 丢弃打开前设备缓冲区中的残留数据
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            debug!("Failed to clear serial buffers on {}: {}", port_name, e);
        }

        debug!(
            "Opened {} on {} (timeout {:?})",
            serial,
            port_name,
            config.read_timeout()
        );

        Ok(Self {
            serial: serial.to_string(),
            port_name: port_name.to_string(),
            reader: Mutex::new(Some(ReadHalf {
                port,
                pending: None,
            })),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        })
    }

    /// 系统端口名（如 `/dev/ttyUSB0`）
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialPortTransport {
    fn read_packet(&self) -> Result<Option<[u8; SHORT_LEN]>, TransportError> {
        let mut guard = self.reader.lock();
        if self.closed.load(Ordering::Acquire) {
            // close() 期间读端被占用时由这里完成释放
            guard.take();
            return Err(TransportError::Closed);
        }
        let Some(half) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        let mut buf = [0u8; SHORT_LEN];
        let mut filled = 0;
        if let Some(byte) = half.pending.take() {
            buf[0] = byte;
            filled = 1;
        }

        match half.port.read(&mut buf[filled..]) {
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::TimedOut => {},
            Err(e) => {
                // 已缓存的首字节保留到下一次读取
                if filled == 1 {
                    half.pending = Some(buf[0]);
                }
                return Err(e.into());
            },
        }

        match filled {
            0 => Ok(None),
            1 => {
                trace!("Partial packet on {}, keeping {:#04X}", self.port_name, buf[0]);
                half.pending = Some(buf[0]);
                Ok(None)
            },
            _ => Ok(Some(buf)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.writer.lock();
        let Some(port) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };
        match port.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.writer.lock().take();
        // IO 线程正在读时不抢锁，读超时返回后自行释放
        if let Some(mut guard) = self.reader.try_lock() {
            guard.take();
        }
        debug!("Closed {} ({})", self.serial, self.port_name);
    }

    fn serial_number(&self) -> &str {
        &self.serial
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// 通过系统串口枚举发现设备
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl SerialConnector {
    pub fn new() -> Self {
        Self
    }

    /// 返回 (端口名, USB 序列号) 列表
    fn usb_ports() -> Result<Vec<(String, String)>, TransportError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .filter_map(|info| match info.port_type {
                SerialPortType::UsbPort(usb) => usb.serial_number.map(|sn| (info.port_name, sn)),
                _ => None,
            })
            .collect())
    }
}

impl Connector for SerialConnector {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        Ok(Self::usb_ports()?.into_iter().map(|(_, serial)| serial).collect())
    }

    fn open(
        &self,
        serial: &str,
        config: &TransportConfig,
    ) -> Result<SharedTransport, TransportError> {
        let ports = Self::usb_ports()?;
        let mut matches = ports.iter().filter(|(_, sn)| sn == serial);
        let Some((port_name, _)) = matches.next() else {
            return Err(TransportError::NotFound(serial.to_string()));
        };
        // macOS 会为同一设备同时列出 cu.* 与 tty.*
        if matches.next().is_some() {
            warn!("Multiple ports report serial {}, using {}", serial, port_name);
        }
        Ok(Arc::new(SerialPortTransport::open(serial, port_name, config)?))
    }
}
