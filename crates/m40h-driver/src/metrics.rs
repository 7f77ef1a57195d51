//! 链路运行指标
//!
//! 无锁原子计数器，IO 线程与命令路径并发更新，`snapshot()` 一次性读取。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 进入命令队列的命令数
    pub commands_queued: AtomicU64,

    /// 完整写出的命令数（含同步发送）
    pub commands_sent: AtomicU64,

    /// 在 IO 线程回调内同步发送的命令数
    pub commands_sent_sync: AtomicU64,

    /// 丢弃的命令数（重试后仍未写完、无会话、释放时残留）
    pub commands_dropped: AtomicU64,

    /// 部分写入后的重试次数
    pub write_retries: AtomicU64,

    pub switch_events: AtomicU64,

    /// 通过去抖后派发的 ADC 事件数
    pub adc_events: AtomicU64,

    /// 被去抖过滤掉的 ADC 采样数
    pub adc_suppressed: AtomicU64,

    /// 未知操作码消息数
    pub unknown_opcodes: AtomicU64,

    /// 坐标超出网格的按键消息数
    pub out_of_grid: AtomicU64,

    /// 回调 panic 次数
    pub listener_panics: AtomicU64,

    /// 读错误次数（超时不计）
    pub read_errors: AtomicU64,

    /// 重连尝试次数（每次 open 计一次）
    pub reconnect_attempts: AtomicU64,

    /// 成功重连次数
    pub reconnects: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_queued: self.commands_queued.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_sent_sync: self.commands_sent_sync.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            switch_events: self.switch_events.load(Ordering::Relaxed),
            adc_events: self.adc_events.load(Ordering::Relaxed),
            adc_suppressed: self.adc_suppressed.load(Ordering::Relaxed),
            unknown_opcodes: self.unknown_opcodes.load(Ordering::Relaxed),
            out_of_grid: self.out_of_grid.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub commands_queued: u64,
    pub commands_sent: u64,
    pub commands_sent_sync: u64,
    pub commands_dropped: u64,
    pub write_retries: u64,
    pub switch_events: u64,
    pub adc_events: u64,
    pub adc_suppressed: u64,
    pub unknown_opcodes: u64,
    pub out_of_grid: u64,
    pub listener_panics: u64,
    pub read_errors: u64,
    pub reconnect_attempts: u64,
    pub reconnects: u64,
}

impl MetricsSnapshot {
    /// ADC 采样被过滤的比例（百分比），无采样时返回 0.0
    pub fn adc_suppression_rate(&self) -> f64 {
        let total = self.adc_events + self.adc_suppressed;
        if total == 0 {
            return 0.0;
        }
        self.adc_suppressed as f64 / total as f64 * 100.0
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} (sync={}) queued={} dropped={} retries={} | switch={} adc={} adc_suppressed={} unknown={} out_of_grid={} panics={} | read_errors={} reconnects={}/{}",
            self.commands_sent,
            self.commands_sent_sync,
            self.commands_queued,
            self.commands_dropped,
            self.write_retries,
            self.switch_events,
            self.adc_events,
            self.adc_suppressed,
            self.unknown_opcodes,
            self.out_of_grid,
            self.listener_panics,
            self.read_errors,
            self.reconnects,
            self.reconnect_attempts,
        )
    }
}
