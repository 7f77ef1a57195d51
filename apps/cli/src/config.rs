//! CLI 配置文件
//!
//! 位于 `<config_dir>/m40h/config.toml`，所有字段可选，缺省时使用驱动默认值。

use anyhow::{Context, Result};
use m40h_driver::DeviceLinkBuilder;
use m40h_driver::config::{DEFAULT_INTENSITY, LinkConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置目录
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("m40h");
    Ok(path)
}

/// 默认配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// 默认设备序列号
    pub serial: Option<String>,

    /// 打开设备后写入的亮度
    pub intensity: Option<u8>,

    /// ADC 去抖历史长度（2 或 3）
    pub adc_history: Option<usize>,

    pub io_timeout_ms: Option<u64>,

    pub join_timeout_ms: Option<u64>,

    /// 重连尝试次数（0 表示不重连）
    pub reconnect_attempts: Option<u32>,
}

impl CliConfig {
    /// 加载默认位置的配置，文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("创建配置目录失败")?;
        }
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, format!("# m40h CLI Configuration\n\n{content}"))
            .context("写入配置文件失败")?;
        Ok(())
    }

    /// 合并到驱动配置
    pub fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        if let Some(ms) = self.io_timeout_ms {
            config.io_timeout_ms = ms;
        }
        if let Some(ms) = self.join_timeout_ms {
            config.join_timeout_ms = ms;
        }
        if let Some(history) = self.adc_history {
            config.adc_history = history;
        }
        if let Some(attempts) = self.reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        config
    }

    /// 按配置创建链路构建器（命令行序列号优先）
    pub fn builder(&self, serial: Option<&str>) -> DeviceLinkBuilder {
        let builder = DeviceLinkBuilder::new()
            .config(self.link_config())
            .intensity(self.intensity.unwrap_or(DEFAULT_INTENSITY));
        match serial.or(self.serial.as_deref()) {
            Some(serial) => builder.serial(serial),
            None => builder,
        }
    }
}
