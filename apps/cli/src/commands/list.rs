//! 列出候选设备

use crate::config::CliConfig;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct ListCommand {
    /// 列出全部 USB 串口序列号（不按 m40h 过滤）
    #[arg(short, long)]
    pub all: bool,
}

impl ListCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let mut link_config = config.link_config();
        if self.all {
            // 空子串匹配所有序列号
            link_config.serial_filter.clear();
        }
        let link = config.builder(None).config(link_config).build()?;
        let serials = link.enumerate_candidate_serials()?;

        if serials.is_empty() {
            println!("未发现设备");
            return Ok(());
        }
        for serial in serials {
            println!("{}", serial);
        }
        Ok(())
    }
}
