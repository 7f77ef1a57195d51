//! Mock 传输（无硬件依赖，用于测试）
//!
//! `MockDevice` 模拟一台物理设备：测试通过它注入上报消息、制造读写故障、
//! 检查主机写出的字节。同一设备被重复打开时（重连）共享同一份脚本状态。

use crate::{Connector, SHORT_LEN, SharedTransport, Transport, TransportConfig, TransportError};
use m40h_protocol::InputEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 阻塞读的轮询间隔
const BLOCK_POLL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct DeviceState {
    inbox: VecDeque<[u8; SHORT_LEN]>,
    read_failures: usize,
    write_failures: usize,
    /// 每次写入允许的最大字节数（按顺序消耗）
    write_limits: VecDeque<usize>,
    writes: Vec<Vec<u8>>,
    /// 读阻塞直到传输被关闭
    block_reads: bool,
    /// 读阻塞且忽略关闭（模拟卡死的驱动）
    hang_reads: bool,
}

struct DeviceShared {
    serial: String,
    state: Mutex<DeviceState>,
    cond: Condvar,
}

/// 模拟设备句柄（可克隆，克隆共享状态）
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<DeviceShared>,
}

impl MockDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                serial: serial.to_string(),
                state: Mutex::new(DeviceState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn serial(&self) -> &str {
        &self.shared.serial
    }

    /// 注入一条原始上报消息
    pub fn push_packet(&self, raw: [u8; SHORT_LEN]) {
        self.shared.state.lock().inbox.push_back(raw);
        self.shared.cond.notify_all();
    }

    /// 注入一个输入事件（按设备端编码）
    pub fn push_event(&self, event: InputEvent) {
        self.push_packet(event.to_bytes());
    }

    /// 接下来 `count` 次读返回 IO 错误
    pub fn fail_reads(&self, count: usize) {
        self.shared.state.lock().read_failures += count;
        self.shared.cond.notify_all();
    }

    /// 接下来 `count` 次写返回 IO 错误
    pub fn fail_writes(&self, count: usize) {
        self.shared.state.lock().write_failures += count;
    }

    /// 下一次写最多接受 `limit` 字节
    pub fn limit_next_write(&self, limit: usize) {
        self.shared.state.lock().write_limits.push_back(limit);
    }

    pub fn block_reads(&self, block: bool) {
        self.shared.state.lock().block_reads = block;
        self.shared.cond.notify_all();
    }

    pub fn hang_reads(&self, hang: bool) {
        self.shared.state.lock().hang_reads = hang;
        self.shared.cond.notify_all();
    }

    /// 尚未被读取的上报消息数
    pub fn pending_packets(&self) -> usize {
        self.shared.state.lock().inbox.len()
    }

    /// 剩余的读故障次数
    pub fn pending_read_failures(&self) -> usize {
        self.shared.state.lock().read_failures
    }

    /// 每次 `write` 调用实际写入的字节
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().writes.clone()
    }

    /// 所有写入字节按顺序拼接
    pub fn written_bytes(&self) -> Vec<u8> {
        self.shared.state.lock().writes.concat()
    }

    pub fn clear_writes(&self) {
        self.shared.state.lock().writes.clear();
    }
}

/// 一次打开会话对应的传输
pub struct MockTransport {
    device: MockDevice,
    read_timeout: Duration,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(device: MockDevice, read_timeout: Duration) -> Self {
        Self {
            device,
            read_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for MockTransport {
    fn read_packet(&self) -> Result<Option<[u8; SHORT_LEN]>, TransportError> {
        let shared = &self.device.shared;
        let mut state = shared.state.lock();

        while state.hang_reads {
            shared.cond.wait_for(&mut state, BLOCK_POLL);
        }
        while state.block_reads && !self.is_closed() {
            shared.cond.wait_for(&mut state, BLOCK_POLL);
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(TransportError::Io(std::io::Error::other("mock read failure")));
        }
        if let Some(raw) = state.inbox.pop_front() {
            return Ok(Some(raw));
        }

        // 空闲时模拟读超时，有新消息注入时提前唤醒
        shared.cond.wait_for(&mut state, self.read_timeout);
        Ok(state.inbox.pop_front())
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut state = self.device.shared.state.lock();
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(TransportError::Io(std::io::Error::other("mock write failure")));
        }
        let limit = state.write_limits.pop_front().unwrap_or(bytes.len());
        let written = limit.min(bytes.len());
        if written > 0 {
            state.writes.push(bytes[..written].to_vec());
        }
        Ok(written)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.device.shared.cond.notify_all();
    }

    fn serial_number(&self) -> &str {
        self.device.serial()
    }
}

/// Mock 设备发现
#[derive(Default)]
pub struct MockConnector {
    devices: Mutex<Vec<MockDevice>>,
    /// 额外列出但无法打开的序列号
    foreign: Mutex<Vec<String>>,
    open_calls: AtomicUsize,
    open_failures: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接一台模拟设备
    pub fn attach(&self, device: MockDevice) {
        self.devices.lock().push(device);
    }

    /// 列出一个非 40h 的序列号
    pub fn attach_foreign(&self, serial: &str) {
        self.foreign.lock().push(serial.to_string());
    }

    /// 移除设备（模拟拔出）
    pub fn detach(&self, serial: &str) {
        self.devices.lock().retain(|d| d.serial() != serial);
    }

    /// 接下来 `count` 次 open 失败
    pub fn fail_opens(&self, count: usize) {
        self.open_failures.fetch_add(count, Ordering::AcqRel);
    }

    /// 累计 open 调用次数（含失败）
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Acquire)
    }
}

impl Connector for MockConnector {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        let mut serials: Vec<String> =
            self.foreign.lock().iter().cloned().collect();
        serials.extend(self.devices.lock().iter().map(|d| d.serial().to_string()));
        Ok(serials)
    }

    fn open(
        &self,
        serial: &str,
        config: &TransportConfig,
    ) -> Result<SharedTransport, TransportError> {
        self.open_calls.fetch_add(1, Ordering::AcqRel);
        let failed = self
            .open_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Open {
                serial: serial.to_string(),
                message: "mock open failure".to_string(),
            });
        }
        let device = self
            .devices
            .lock()
            .iter()
            .find(|d| d.serial() == serial)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(serial.to_string()))?;
        Ok(Arc::new(MockTransport::new(device, config.read_timeout())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(device: &MockDevice) -> MockTransport {
        MockTransport::new(device.clone(), Duration::from_millis(1))
    }

    #[test]
    fn test_scripted_reads() {
        let device = MockDevice::new("m40h0001");
        let t = transport(&device);
        device.push_packet([0x01, 0x22]);
        device.fail_reads(1);

        assert!(matches!(t.read_packet(), Err(TransportError::Io(_))));
        assert_eq!(t.read_packet().unwrap(), Some([0x01, 0x22]));
        assert_eq!(t.read_packet().unwrap(), None);
    }

    #[test]
    fn test_short_write_is_recorded() {
        let device = MockDevice::new("m40h0001");
        let t = transport(&device);
        device.limit_next_write(1);

        assert_eq!(t.write(&[0x21, 0x34]).unwrap(), 1);
        assert_eq!(t.write(&[0x34]).unwrap(), 1);
        assert_eq!(device.writes(), vec![vec![0x21], vec![0x34]]);
        assert_eq!(device.written_bytes(), vec![0x21, 0x34]);
    }

    #[test]
    fn test_close_unblocks_read() {
        let device = MockDevice::new("m40h0001");
        let t = Arc::new(transport(&device));
        device.block_reads(true);

        let reader = {
            let t = t.clone();
            std::thread::spawn(move || t.read_packet())
        };
        std::thread::sleep(Duration::from_millis(20));
        t.close();

        assert!(matches!(reader.join().unwrap(), Err(TransportError::Closed)));
        assert!(matches!(t.write(&[0x30, 0x0F]), Err(TransportError::Closed)));
    }

    #[test]
    fn test_connector_counts_opens() {
        let connector = MockConnector::new();
        connector.attach(MockDevice::new("m40h0001"));
        connector.attach_foreign("FT0001");
        connector.fail_opens(1);

        let config = TransportConfig::default();
        assert!(connector.open("m40h0001", &config).is_err());
        assert!(connector.open("m40h0001", &config).is_ok());
        assert!(matches!(
            connector.open("m40h9999", &config),
            Err(TransportError::NotFound(_))
        ));
        assert_eq!(connector.open_calls(), 3);
        assert_eq!(connector.enumerate().unwrap(), vec!["FT0001", "m40h0001"]);
    }
}
