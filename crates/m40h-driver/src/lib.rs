//! 驱动层模块
//!
//! 本模块提供 40h 按键/LED 矩阵的设备驱动功能，包括：
//! - IO 线程管理（读写、超时、重连）
//! - 命令队列与回调内同步发送
//! - 按键/ADC 单槽位订阅与 ADC 去抖
//! - 链路状态与运行指标

mod builder;
pub mod config;
mod error;
pub mod jitter;
mod link;
pub mod metrics;
mod pipeline;
pub mod queue;
pub mod registry;
pub mod state;

pub use builder::DeviceLinkBuilder;
pub use config::{LinkConfig, ReconnectPolicy};
pub use error::{DriverError, SubscribeError};
pub use jitter::AdcJitterFilter;
pub use link::{CommandSender, DeviceLink, GridCommands};
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use queue::CommandQueue;
pub use registry::{AdcListener, ListenerHandle, SubscriberRegistry, SwitchListener};
pub use state::{AtomicLinkState, LinkState};
