//! 命令定义和实现

pub mod config;
pub mod led;
pub mod list;
pub mod monitor;

pub use config::ConfigCommand;
pub use led::{ClearCommand, IntensityCommand, LedCommand, TestCommand};
pub use list::ListCommand;
pub use monitor::MonitorCommand;

use crate::config::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use m40h_driver::DeviceLink;
use std::time::{Duration, Instant};

/// 设备选择参数
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// 设备序列号（覆盖配置，默认选择第一个候选设备）
    #[arg(short, long)]
    pub serial: Option<String>,
}

impl DeviceArgs {
    /// 连接设备
    pub fn connect(&self, config: &CliConfig) -> Result<DeviceLink> {
        println!("🔌 连接到设备...");
        let link = config
            .builder(self.serial.as_deref())
            .connect()
            .context("打开设备失败")?;
        println!(
            "✅ 已连接: {}",
            link.serial_number().unwrap_or_else(|| "?".to_string())
        );
        Ok(link)
    }
}

/// 等待排队命令被 IO 线程取走后释放设备
pub fn flush_and_release(link: &DeviceLink, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while link.queued_commands() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    link.release_device().context("释放设备失败")?;
    Ok(())
}
