//! 命令队列与发送
//!
//! 应用线程把命令压入 FIFO，IO 线程每轮读取前一次性取走全部命令并按序写出。
//! 队列的生命周期与设备会话无关，重连期间压入的命令在新会话上发出。

use crate::metrics::LinkMetrics;
use m40h_protocol::Command;
use m40h_serial::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// 线程安全的命令 FIFO
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, command: Command) {
        self.inner.lock().push_back(command);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// 原子地取走全部命令
    ///
    /// 锁只在交换期间持有，写设备时不阻塞入队方。
    pub fn take_all(&self) -> VecDeque<Command> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// 取走并按序发送全部命令，返回完整写出的数量
    pub fn drain_and_send(&self, transport: &dyn Transport, metrics: &LinkMetrics) -> usize {
        let batch = self.take_all();
        if batch.is_empty() {
            return 0;
        }
        trace!("Draining {} queued command(s)", batch.len());
        let mut sent = 0;
        for command in &batch {
            if send_command(transport, command, metrics) {
                sent += 1;
            }
        }
        sent
    }
}

/// 编码并写出一条命令
///
/// 首次写入不完整时对剩余字节重试一次，仍不完整则丢弃该命令并记录日志，
/// 不会阻塞后续命令。返回是否完整写出。
pub fn send_command(transport: &dyn Transport, command: &Command, metrics: &LinkMetrics) -> bool {
    let packet = command.encode();
    let bytes = packet.as_bytes();

    let written = match transport.write(bytes) {
        Ok(n) => n.min(bytes.len()),
        Err(e) => {
            trace!("Write of {:?} failed: {}", command, e);
            0
        },
    };
    if written == bytes.len() {
        LinkMetrics::incr(&metrics.commands_sent);
        return true;
    }

    LinkMetrics::incr(&metrics.write_retries);
    let rest = &bytes[written..];
    match transport.write(rest) {
        Ok(n) if n >= rest.len() => {
            LinkMetrics::incr(&metrics.commands_sent);
            true
        },
        Ok(n) => {
            warn!(
                "Dropping {:?}: wrote {} of {} bytes after retry",
                command,
                written + n,
                bytes.len()
            );
            LinkMetrics::incr(&metrics.commands_dropped);
            false
        },
        Err(e) => {
            warn!("Dropping {:?}: {}", command, e);
            LinkMetrics::incr(&metrics.commands_dropped);
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m40h_serial::mock::{MockDevice, MockTransport};
    use std::time::Duration;

    fn setup() -> (MockDevice, MockTransport, LinkMetrics) {
        let device = MockDevice::new("m40h0001");
        let transport = MockTransport::new(device.clone(), Duration::from_millis(1));
        (device, transport, LinkMetrics::new())
    }

    #[test]
    fn test_fifo_order() {
        let (device, transport, metrics) = setup();
        let queue = CommandQueue::new();
        let a = Command::SetLed {
            row: 0,
            col: 0,
            on: true,
        };
        let b = Command::SetLedRow {
            row: 1,
            columns: 0xFF,
        };
        let c = Command::TestLed { pattern: 1 };
        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(c);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.drain_and_send(&transport, &metrics), 3);
        assert!(queue.is_empty());
        assert_eq!(
            device.writes(),
            vec![
                a.encode().as_bytes().to_vec(),
                b.encode().as_bytes().to_vec(),
                c.encode().as_bytes().to_vec(),
            ]
        );
    }

    #[test]
    fn test_partial_write_retried_once() {
        let (device, transport, metrics) = setup();
        let command = Command::SetLedRgb {
            row: 2,
            col: 3,
            color: m40h_protocol::Rgb::new(1, 2, 3),
        };
        device.limit_next_write(2);

        assert!(send_command(&transport, &command, &metrics));
        assert_eq!(device.written_bytes(), vec![0x90, 0x32, 1, 2, 3]);
        assert_eq!(device.writes().len(), 2);
        assert_eq!(metrics.snapshot().write_retries, 1);
        assert_eq!(metrics.snapshot().commands_sent, 1);
    }

    #[test]
    fn test_incomplete_retry_drops_command_only() {
        let (device, transport, metrics) = setup();
        let queue = CommandQueue::new();
        queue.enqueue(Command::SetLedIntensity { level: 4 });
        queue.enqueue(Command::TestLed { pattern: 0 });
        device.limit_next_write(1);
        device.limit_next_write(0);

        assert_eq!(queue.drain_and_send(&transport, &metrics), 1);
        // 第一条只写出 1 字节后被丢弃，第二条完整写出
        assert_eq!(device.writes(), vec![vec![0x30], vec![0x40, 0x00]]);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commands_dropped, 1);
        assert_eq!(snapshot.commands_sent, 1);
    }

    #[test]
    fn test_write_error_then_retry_succeeds() {
        let (device, transport, metrics) = setup();
        device.fail_writes(1);

        assert!(send_command(
            &transport,
            &Command::Shutdown { state: 1 },
            &metrics
        ));
        assert_eq!(device.written_bytes(), vec![0x60, 0x01]);
    }
}
