//! 设备链路（对外 API）

use crate::config::LinkConfig;
use crate::error::{DriverError, SubscribeError};
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::pipeline::{CommandPath, LoopContext, Session, io_loop, open_session};
use crate::registry::{AdcListener, ListenerHandle, SubscriberRegistry, SwitchListener};
use crate::state::{AtomicLinkState, LinkState};
use m40h_protocol::{Command, GRID_SIZE, PresetGroup, Rgb};
use m40h_serial::{Connector, filter_candidates};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程代为 join，超时后由它继续等待目标线程
        thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                )))
            },
        }
    }
}

/// 每种命令一个方法
///
/// 所有方法先校验参数范围，超出范围返回 `DriverError::Protocol` 且不发送。
/// 在 IO 线程（监听者回调）内调用时同步写出，其他线程调用时进入队列。
pub trait GridCommands {
    /// 提交任意命令
    fn submit(&self, command: Command) -> Result<(), DriverError>;

    /// 单个 LED 开关
    fn enable_led(&self, row: u8, col: u8, on: bool) -> Result<(), DriverError> {
        self.submit(Command::SetLed { row, col, on })
    }

    fn set_led_rgb(&self, row: u8, col: u8, color: Rgb) -> Result<(), DriverError> {
        self.submit(Command::SetLedRgb { row, col, color })
    }

    /// 以预设颜色点亮 LED
    fn set_led_preset(
        &self,
        group: PresetGroup,
        slot: u8,
        row: u8,
        col: u8,
    ) -> Result<(), DriverError> {
        self.submit(Command::SetLedPreset {
            group,
            slot,
            row,
            col,
        })
    }

    /// 以全局预设索引（0-31）点亮 LED
    fn set_led_preset_index(&self, index: u8, row: u8, col: u8) -> Result<(), DriverError> {
        let (group, slot) = PresetGroup::split(index)
            .ok_or_else(|| DriverError::InvalidInput(format!("preset index {index} >= 32")))?;
        self.set_led_preset(group, slot, row, col)
    }

    fn update_preset_color(
        &self,
        group: PresetGroup,
        slot: u8,
        color: Rgb,
    ) -> Result<(), DriverError> {
        self.submit(Command::UpdatePresetColor { group, slot, color })
    }

    /// 全局亮度，同时作为下次打开设备时写入的亮度
    fn set_led_intensity(&self, level: u8) -> Result<(), DriverError> {
        self.submit(Command::SetLedIntensity { level })
    }

    fn test_led(&self, pattern: u8) -> Result<(), DriverError> {
        self.submit(Command::TestLed { pattern })
    }

    fn enable_adc(&self, port: u8, enable: bool) -> Result<(), DriverError> {
        self.submit(Command::EnableAdc { port, enable })
    }

    fn shutdown(&self, state: u8) -> Result<(), DriverError> {
        self.submit(Command::Shutdown { state })
    }

    /// 整行设置，`columns` 的 Bit N 对应第 N 列
    fn enable_led_row(&self, row: u8, columns: u8) -> Result<(), DriverError> {
        self.submit(Command::SetLedRow { row, columns })
    }

    /// 整列设置，`rows` 的 Bit N 对应第 N 行
    fn enable_led_column(&self, col: u8, rows: u8) -> Result<(), DriverError> {
        self.submit(Command::SetLedColumn { col, rows })
    }

    /// 熄灭全部 LED（逐行写 0）
    fn clear_leds(&self) -> Result<(), DriverError> {
        for row in 0..GRID_SIZE {
            self.enable_led_row(row, 0)?;
        }
        Ok(())
    }
}

/// 可克隆的命令发送端
///
/// 只持有命令路径，不持有监听者注册表，可以放进监听者闭包中使用。
#[derive(Clone)]
pub struct CommandSender {
    path: Arc<CommandPath>,
}

impl GridCommands for CommandSender {
    fn submit(&self, command: Command) -> Result<(), DriverError> {
        command.validate()?;
        self.path.submit(command);
        Ok(())
    }
}

/// 当前 IO 线程
struct IoThread {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// 40h 设备链路
///
/// 同一时刻最多持有一个设备会话。会话对应一个专用 IO 线程，负责全部读写、
/// 事件派发与重连；命令队列与监听者注册表跨会话保留。
///
/// # 示例
///
/// ```rust,no_run
/// use m40h_driver::{DeviceLinkBuilder, GridCommands};
/// use m40h_protocol::SwitchEvent;
///
/// let link = DeviceLinkBuilder::new().build()?;
/// let leds = link.sender();
/// link.subscribe_switch(move |event: SwitchEvent| {
///     // 回调在 IO 线程上执行，命令同步写出
///     let _ = leds.enable_led(event.row, event.col, event.pressed);
/// })?;
/// link.acquire_first()?;
/// # Ok::<(), m40h_driver::DriverError>(())
/// ```
pub struct DeviceLink {
    path: Arc<CommandPath>,
    registry: Arc<SubscriberRegistry>,
    state: Arc<AtomicLinkState>,
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    io: Mutex<Option<IoThread>>,
}

impl DeviceLink {
    /// 使用给定的 Connector 创建链路（不打开设备）
    pub fn new(connector: Arc<dyn Connector>, config: LinkConfig, intensity: u8) -> Self {
        Self {
            path: Arc::new(CommandPath::new(Arc::new(LinkMetrics::new()), intensity)),
            registry: Arc::new(SubscriberRegistry::new()),
            state: Arc::new(AtomicLinkState::new(LinkState::Disconnected)),
            connector,
            config,
            io: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// 列出序列号包含过滤子串的设备
    pub fn enumerate_candidate_serials(&self) -> Result<Vec<String>, DriverError> {
        let serials = self.connector.enumerate()?;
        Ok(filter_candidates(serials, &self.config.serial_filter))
    }

    /// 打开指定序列号的设备并启动 IO 线程
    ///
    /// 打开成功后立即写入最近一次设置的亮度。已持有会话时返回
    /// `DriverError::AlreadyAcquired`。
    pub fn acquire_device(&self, serial: &str) -> Result<(), DriverError> {
        let mut io = self.io.lock();
        if io.is_some()
            && let Some(session) = self.path.session.load_full()
        {
            return Err(DriverError::AlreadyAcquired(session.serial.clone()));
        }
        // 上一个会话因重连失败已撤销，回收正在退出的线程
        if let Some(finished) = io.take() {
            let _ = finished.handle.join();
            self.path.discard_queued("left over from the previous session");
        }

        self.state.set(LinkState::Acquiring);
        let transport =
            match open_session(self.connector.as_ref(), serial, &self.config, &self.path) {
                Ok(transport) => transport,
                Err(e) => {
                    self.state.set(LinkState::Disconnected);
                    warn!("Failed to acquire {}: {}", serial, e);
                    return Err(e.into());
                },
            };

        let stop = Arc::new(AtomicBool::new(false));
        let (start_tx, start_rx) = crossbeam_channel::bounded(1);
        let ctx = LoopContext {
            serial: serial.to_string(),
            transport: transport.clone(),
            path: self.path.clone(),
            registry: self.registry.clone(),
            state: self.state.clone(),
            connector: self.connector.clone(),
            stop: stop.clone(),
            config: self.config.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("m40h-io-{serial}"))
            .spawn(move || {
                io_loop(ctx, start_rx);
            })
            .map_err(|e| {
                transport.close();
                self.state.set(LinkState::Disconnected);
                DriverError::IoThread(e.to_string())
            })?;

        // 会话必须先于循环可见，回调内的同步发送依赖 io_thread
        self.path.session.store(Some(Arc::new(Session {
            serial: serial.to_string(),
            transport,
            io_thread: handle.thread().id(),
        })));
        self.state.set(LinkState::Connected);
        let _ = start_tx.send(());

        *io = Some(IoThread { handle, stop });
        info!("Acquired device {}", serial);
        Ok(())
    }

    /// 打开第一个候选设备，返回其序列号
    pub fn acquire_first(&self) -> Result<String, DriverError> {
        let candidates = self.enumerate_candidate_serials()?;
        let Some(serial) = candidates.into_iter().next() else {
            return Err(DriverError::NoDevice(self.config.serial_filter.clone()));
        };
        self.acquire_device(&serial)?;
        Ok(serial)
    }

    /// 停止 IO 线程并关闭设备
    ///
    /// 等待 IO 线程退出最多 `join_timeout_ms`，无论是否按时退出都会强制关闭
    /// 设备句柄。未持有会话时直接返回。不能在监听者回调内调用。
    pub fn release_device(&self) -> Result<(), DriverError> {
        if self.on_io_thread() {
            return Err(DriverError::ReleaseFromIoThread);
        }
        let Some(io) = self.io.lock().take() else {
            return Ok(());
        };

        io.stop.store(true, Ordering::Release);
        let timeout = self.config.join_timeout();
        if io.handle.join_timeout(timeout).is_err() {
            warn!(
                "IO thread did not exit within {:?}, force-closing device",
                timeout
            );
        }

        if let Some(session) = self.path.session.swap(None) {
            session.transport.close();
            info!("Released device {}", session.serial);
        }
        self.state.set(LinkState::Disconnected);
        self.path.discard_queued("at release");
        Ok(())
    }

    fn on_io_thread(&self) -> bool {
        self.path
            .session
            .load_full()
            .is_some_and(|session| session.io_thread == thread::current().id())
    }

    /// 当前会话的序列号
    pub fn serial_number(&self) -> Option<String> {
        self.path
            .session
            .load_full()
            .map(|session| session.serial.clone())
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get().is_connected()
    }

    /// 获取可克隆的命令发送端
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            path: self.path.clone(),
        }
    }

    /// 最近一次设置的亮度
    pub fn intensity(&self) -> u8 {
        self.path.intensity()
    }

    /// 尚未发出的排队命令数
    pub fn queued_commands(&self) -> usize {
        self.path.queue.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.path.metrics.snapshot()
    }

    pub fn subscribe_switch(
        &self,
        listener: impl SwitchListener + 'static,
    ) -> Result<ListenerHandle, SubscribeError> {
        self.registry.subscribe_switch(listener)
    }

    pub fn unsubscribe_switch(&self, handle: ListenerHandle) -> Result<(), SubscribeError> {
        self.registry.unsubscribe_switch(handle)
    }

    pub fn subscribe_adc(
        &self,
        listener: impl AdcListener + 'static,
    ) -> Result<ListenerHandle, SubscribeError> {
        self.registry.subscribe_adc(listener)
    }

    pub fn unsubscribe_adc(&self, handle: ListenerHandle) -> Result<(), SubscribeError> {
        self.registry.unsubscribe_adc(handle)
    }
}

impl GridCommands for DeviceLink {
    fn submit(&self, command: Command) -> Result<(), DriverError> {
        command.validate()?;
        self.path.submit(command);
        Ok(())
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        match self.release_device() {
            Ok(()) => {},
            Err(DriverError::ReleaseFromIoThread) => {
                // 最后一个引用在回调内释放：无法 join 自身，只通知 IO 线程退出，
                // 设备由 IO 线程在回调返回后关闭
                if let Some(io) = self.io.lock().take() {
                    io.stop.store(true, Ordering::Release);
                }
                self.path.session.store(None);
                self.state.set(LinkState::Disconnected);
                debug!("DeviceLink dropped on its IO thread, loop asked to stop");
            },
            Err(e) => warn!("Failed to release device on drop: {}", e),
        }

        self.path.discard_queued("at teardown");
        let listeners = self.registry.clear();
        if listeners > 0 {
            warn!("{} listener(s) still subscribed at teardown", listeners);
        }
        debug!("DeviceLink dropped");
    }
}
