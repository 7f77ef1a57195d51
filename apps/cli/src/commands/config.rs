//! 配置管理命令

use crate::config::{CliConfig, config_file};
use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认设备序列号
        #[arg(short, long)]
        serial: Option<String>,

        /// 默认亮度 (0-15)
        #[arg(short, long)]
        intensity: Option<u8>,

        /// ADC 去抖历史长度（2 或 3）
        #[arg(long)]
        adc_history: Option<usize>,

        /// 重连尝试次数
        #[arg(long)]
        reconnect_attempts: Option<u32>,
    },

    /// 显示当前配置
    Show,

    /// 写入一份默认配置文件
    Init {
        /// 覆盖已有文件
        #[arg(short, long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self, path: Option<PathBuf>) -> Result<()> {
        let path = match path {
            Some(path) => path,
            None => config_file()?,
        };

        match self {
            ConfigCommand::Set {
                serial,
                intensity,
                adc_history,
                reconnect_attempts,
            } => {
                let mut config = CliConfig::load_from(&path)?;
                if let Some(serial) = serial {
                    println!("✅ 设置设备序列号: {}", serial);
                    config.serial = Some(serial);
                }
                if let Some(level) = intensity {
                    println!("✅ 设置亮度: {}", level);
                    config.intensity = Some(level);
                }
                if let Some(history) = adc_history {
                    println!("✅ 设置 ADC 去抖历史: {}", history);
                    config.adc_history = Some(history);
                }
                if let Some(attempts) = reconnect_attempts {
                    println!("✅ 设置重连次数: {}", attempts);
                    config.reconnect_attempts = Some(attempts);
                }
                config.save_to(&path)
            },

            ConfigCommand::Show => {
                let config = CliConfig::load_from(&path)?;
                let link = config.link_config();
                println!("配置文件: {}", path.display());
                println!("  序列号: {:?}", config.serial);
                println!(
                    "  亮度: {}",
                    config
                        .intensity
                        .unwrap_or(m40h_driver::config::DEFAULT_INTENSITY)
                );
                println!("  ADC 去抖历史: {}", link.adc_history);
                println!("  IO 超时: {} ms", link.io_timeout_ms);
                println!("  释放等待: {} ms", link.join_timeout_ms);
                println!("  重连次数: {}", link.reconnect.max_attempts);
                Ok(())
            },

            ConfigCommand::Init { force } => {
                if path.exists() && !force {
                    anyhow::bail!("配置文件已存在: {} (使用 --force 覆盖)", path.display());
                }
                let link = CliConfig::default().link_config();
                let config = CliConfig {
                    serial: None,
                    intensity: Some(m40h_driver::config::DEFAULT_INTENSITY),
                    adc_history: Some(link.adc_history),
                    io_timeout_ms: Some(link.io_timeout_ms),
                    join_timeout_ms: Some(link.join_timeout_ms),
                    reconnect_attempts: Some(link.reconnect.max_attempts),
                };
                config.save_to(&path)?;
                println!("✅ 已写入 {}", path.display());
                Ok(())
            },
        }
    }
}
