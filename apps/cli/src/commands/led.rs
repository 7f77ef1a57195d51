//! LED 单次命令

use super::{DeviceArgs, flush_and_release};
use crate::config::CliConfig;
use anyhow::{Result, bail};
use clap::Args;
use m40h_driver::GridCommands;
use std::time::Duration;

/// 等待命令发出的上限
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// 设置单个 LED
#[derive(Args, Debug)]
pub struct LedCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// 行 (0-7)
    pub row: u8,

    /// 列 (0-7)
    pub col: u8,

    /// on / off
    #[arg(default_value = "on")]
    pub state: String,
}

impl LedCommand {
    pub fn parse_state(&self) -> Result<bool> {
        match self.state.to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(true),
            "off" | "0" | "false" => Ok(false),
            other => bail!("无效的 LED 状态: {} (应为 on/off)", other),
        }
    }

    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let on = self.parse_state()?;
        let link = self.device.connect(config)?;
        link.enable_led(self.row, self.col, on)?;
        flush_and_release(&link, FLUSH_TIMEOUT)?;
        println!(
            "✅ LED ({}, {}) {}",
            self.row,
            self.col,
            if on { "on" } else { "off" }
        );
        Ok(())
    }
}

/// LED 自检图案
#[derive(Args, Debug)]
pub struct TestCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// 图案编号（0 关闭自检）
    #[arg(default_value_t = 1)]
    pub pattern: u8,

    /// 自检持续时间（毫秒），结束后关闭自检
    #[arg(short, long)]
    pub duration_ms: Option<u64>,
}

impl TestCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let link = self.device.connect(config)?;
        println!("💡 LED 自检图案 {}", self.pattern);
        link.test_led(self.pattern)?;
        if let Some(ms) = self.duration_ms {
            std::thread::sleep(Duration::from_millis(ms));
            link.test_led(0)?;
        }
        flush_and_release(&link, FLUSH_TIMEOUT)
    }
}

/// 设置全局亮度
#[derive(Args, Debug)]
pub struct IntensityCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// 亮度 (0-15)
    pub level: u8,
}

impl IntensityCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let link = self.device.connect(config)?;
        link.set_led_intensity(self.level)?;
        flush_and_release(&link, FLUSH_TIMEOUT)?;
        println!("✅ 亮度: {}", self.level);
        Ok(())
    }
}

/// 熄灭全部 LED
#[derive(Args, Debug)]
pub struct ClearCommand {
    #[command(flatten)]
    pub device: DeviceArgs,
}

impl ClearCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let link = self.device.connect(config)?;
        link.clear_leds()?;
        flush_and_release(&link, FLUSH_TIMEOUT)?;
        println!("✅ 已熄灭全部 LED");
        Ok(())
    }
}
