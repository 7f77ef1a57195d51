//! IO 循环
//!
//! 单个专用线程持有设备句柄并完成全部读写：
//!
//! 1. 取走命令队列并按序写出
//! 2. 带超时读取一个 2 字节消息
//! 3. 解码后经 ADC 去抖派发给监听者
//! 4. 连续读错误超过阈值时关闭并重新打开同一序列号的设备
//!
//! 读超时是唯一的协作取消点，停止延迟受 `io_timeout_ms` 约束。

use crate::config::LinkConfig;
use crate::jitter::AdcJitterFilter;
use crate::metrics::LinkMetrics;
use crate::queue::{CommandQueue, send_command};
use crate::registry::SubscriberRegistry;
use crate::state::{AtomicLinkState, LinkState};
use arc_swap::ArcSwapOption;
use crossbeam_channel::Receiver;
use m40h_protocol::{AdcEvent, Command, Decoded, InputEvent, decode};
use m40h_serial::{Connector, SharedTransport, TransportError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 退避等待时检查停止标志的间隔
const STOP_POLL: Duration = Duration::from_millis(10);

/// 已打开的设备会话
pub(crate) struct Session {
    pub serial: String,
    pub transport: SharedTransport,
    /// 拥有该会话的 IO 线程
    pub io_thread: ThreadId,
}

/// 命令路径：队列、当前会话与亮度记忆
///
/// 不持有监听者注册表，监听者闭包可以安全地捕获 `CommandSender`。
pub(crate) struct CommandPath {
    pub queue: CommandQueue,
    pub session: ArcSwapOption<Session>,
    pub metrics: Arc<LinkMetrics>,
    /// 最近一次设置的亮度，打开设备后立即写入
    pub intensity: AtomicU8,
}

impl CommandPath {
    pub fn new(metrics: Arc<LinkMetrics>, intensity: u8) -> Self {
        Self {
            queue: CommandQueue::new(),
            session: ArcSwapOption::empty(),
            metrics,
            intensity: AtomicU8::new(intensity),
        }
    }

    /// 提交一条已校验的命令
    ///
    /// - 在 IO 线程上（即监听者回调内）直接同步写出
    /// - 其他线程压入队列，由 IO 线程下一轮发出
    /// - 没有会话时丢弃
    pub fn submit(&self, command: Command) {
        if let Command::SetLedIntensity { level } = command {
            self.intensity.store(level, Ordering::Relaxed);
        }

        let Some(session) = self.session.load_full() else {
            debug!("No device session, dropping {:?}", command);
            LinkMetrics::incr(&self.metrics.commands_dropped);
            return;
        };

        if thread::current().id() == session.io_thread {
            LinkMetrics::incr(&self.metrics.commands_sent_sync);
            send_command(session.transport.as_ref(), &command, &self.metrics);
        } else {
            self.queue.enqueue(command);
            LinkMetrics::incr(&self.metrics.commands_queued);
        }
    }

    pub fn intensity(&self) -> u8 {
        self.intensity.load(Ordering::Relaxed)
    }

    /// 丢弃所有排队命令并计入 `commands_dropped`
    pub fn discard_queued(&self, reason: &str) -> usize {
        let unsent = self.queue.take_all().len();
        if unsent > 0 {
            warn!("Discarding {} unsent command(s) {}", unsent, reason);
            self.metrics
                .commands_dropped
                .fetch_add(unsent as u64, Ordering::Relaxed);
        }
        unsent
    }
}

/// 打开设备并写入亮度
///
/// 首次获取与重连共用此路径。
pub(crate) fn open_session(
    connector: &dyn Connector,
    serial: &str,
    config: &LinkConfig,
    path: &CommandPath,
) -> Result<SharedTransport, TransportError> {
    let transport = connector.open(serial, &config.transport_config())?;
    let level = path.intensity();
    if !send_command(
        transport.as_ref(),
        &Command::SetLedIntensity { level },
        &path.metrics,
    ) {
        warn!("Failed to restore intensity {} on {}", level, serial);
    }
    Ok(transport)
}

/// IO 线程所需的全部共享状态
pub(crate) struct LoopContext {
    pub serial: String,
    pub transport: SharedTransport,
    pub path: Arc<CommandPath>,
    pub registry: Arc<SubscriberRegistry>,
    pub state: Arc<AtomicLinkState>,
    pub connector: Arc<dyn Connector>,
    pub stop: Arc<AtomicBool>,
    pub config: LinkConfig,
}

impl LoopContext {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// IO 循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// `release_device()` 请求停止
    Stopped,
    /// 重连全部失败
    ReconnectFailed,
}

/// IO 线程主循环
///
/// `start_rx` 在会话发布后收到信号才开始循环；发送端被丢弃则直接退出。
pub(crate) fn io_loop(mut ctx: LoopContext, start_rx: Receiver<()>) -> LoopExit {
    if start_rx.recv().is_err() {
        ctx.transport.close();
        return LoopExit::Stopped;
    }

    let mut filter = AdcJitterFilter::new(ctx.config.adc_history);
    let mut consecutive_errors: u32 = 0;
    let metrics = ctx.path.metrics.clone();

    let exit = loop {
        if ctx.stopping() {
            break LoopExit::Stopped;
        }

        ctx.path
            .queue
            .drain_and_send(ctx.transport.as_ref(), &metrics);

        match ctx.transport.read_packet() {
            Ok(Some(raw)) => {
                if consecutive_errors > 0 {
                    trace!("Read recovered after {} error(s)", consecutive_errors);
                    consecutive_errors = 0;
                    ctx.state
                        .transition(LinkState::ErrorCounting, LinkState::Connected);
                }
                dispatch(&ctx, &mut filter, &metrics, raw);
            },
            Ok(None) => {},
            Err(e) => {
                if ctx.stopping() {
                    break LoopExit::Stopped;
                }
                LinkMetrics::incr(&metrics.read_errors);
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors == 1 {
                    ctx.state
                        .transition(LinkState::Connected, LinkState::ErrorCounting);
                }
                trace!("Read error #{} on {}: {}", consecutive_errors, ctx.serial, e);

                if consecutive_errors > ctx.config.error_threshold {
                    warn!(
                        "{} consecutive read errors on {}, reconnecting (last: {})",
                        consecutive_errors, ctx.serial, e
                    );
                    match reconnect(&ctx) {
                        Some(transport) => {
                            ctx.transport = transport;
                            consecutive_errors = 0;
                            filter.reset();
                        },
                        None if ctx.stopping() => break LoopExit::Stopped,
                        None => break LoopExit::ReconnectFailed,
                    }
                }
            },
        }
    };

    ctx.transport.close();
    if exit == LoopExit::ReconnectFailed {
        ctx.path.session.store(None);
        ctx.state.set(LinkState::Disconnected);
        ctx.path.discard_queued("after failed reconnect");
    }
    debug!("IO loop for {} exited: {:?}", ctx.serial, exit);
    exit
}

/// 解码并派发一条上报消息
fn dispatch(
    ctx: &LoopContext,
    filter: &mut AdcJitterFilter,
    metrics: &LinkMetrics,
    raw: [u8; 2],
) {
    match decode(raw) {
        Decoded::Event(InputEvent::SwitchChanged(event)) => {
            LinkMetrics::incr(&metrics.switch_events);
            notify_guarded(metrics, "Switch", || ctx.registry.notify_switch(event));
        },
        Decoded::Event(InputEvent::AdcChanged(event)) => {
            match filter.observe(event.port, event.value) {
                Some(value) => {
                    LinkMetrics::incr(&metrics.adc_events);
                    let event = AdcEvent {
                        port: event.port,
                        value,
                    };
                    notify_guarded(metrics, "ADC", || ctx.registry.notify_adc(event));
                },
                None => LinkMetrics::incr(&metrics.adc_suppressed),
            }
        },
        Decoded::UnknownOpcode { raw } => {
            LinkMetrics::incr(&metrics.unknown_opcodes);
            warn!("Discarding packet with unknown opcode: {:02X?}", raw);
        },
        Decoded::OutOfGrid { raw } => {
            LinkMetrics::incr(&metrics.out_of_grid);
            warn!("Discarding key packet outside the grid: {:02X?}", raw);
        },
    }
}

/// 调用监听者；回调 panic 只记录日志，IO 线程继续运行
fn notify_guarded(metrics: &LinkMetrics, kind: &str, notify: impl FnOnce() -> bool) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(notify)) {
        LinkMetrics::incr(&metrics.listener_panics);
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!("{} listener panicked: {}", kind, message);
    }
}

/// 关闭当前设备并按重连策略重新打开同一序列号
///
/// 成功时发布新会话并返回新句柄；全部失败或收到停止请求时返回 `None`。
fn reconnect(ctx: &LoopContext) -> Option<SharedTransport> {
    ctx.state.set(LinkState::Reconnecting);
    ctx.transport.close();

    let policy = &ctx.config.reconnect;
    let metrics = &ctx.path.metrics;
    for attempt in 1..=policy.max_attempts {
        if ctx.stopping() {
            return None;
        }
        LinkMetrics::incr(&metrics.reconnect_attempts);
        match open_session(ctx.connector.as_ref(), &ctx.serial, &ctx.config, &ctx.path) {
            Ok(transport) => {
                if ctx.stopping() {
                    transport.close();
                    return None;
                }
                ctx.path.session.store(Some(Arc::new(Session {
                    serial: ctx.serial.clone(),
                    transport: transport.clone(),
                    io_thread: thread::current().id(),
                })));
                ctx.state.set(LinkState::Connected);
                LinkMetrics::incr(&metrics.reconnects);
                info!("Reconnected to {} (attempt {})", ctx.serial, attempt);
                return Some(transport);
            },
            Err(e) => {
                warn!(
                    "Reconnect attempt {}/{} to {} failed: {}",
                    attempt, policy.max_attempts, ctx.serial, e
                );
                if attempt < policy.max_attempts {
                    sleep_unless_stopped(policy.backoff(attempt), &ctx.stop);
                }
            },
        }
    }

    error!(
        "Giving up on {} after {} reconnect attempt(s); device released",
        ctx.serial, policy.max_attempts
    );
    None
}

/// 睡眠 `duration`，停止标志置位时提前返回
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
