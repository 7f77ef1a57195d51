//! # m40h CLI
//!
//! Command-line interface for the 40h button/LED grid.
//!
//! ```bash
//! # 列出设备
//! m40h-cli list
//!
//! # 监控按键，按下时点亮对应 LED
//! m40h-cli monitor --echo
//!
//! # 设置默认设备与亮度
//! m40h-cli config set --serial m40h0042 --intensity 8
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod commands;
mod config;

use commands::{
    ClearCommand, ConfigCommand, IntensityCommand, LedCommand, ListCommand, MonitorCommand,
    TestCommand,
};
use config::CliConfig;

/// m40h CLI - 40h 按键/LED 矩阵命令行工具
#[derive(Parser, Debug)]
#[command(name = "m40h-cli")]
#[command(about = "Command-line interface for the 40h grid controller", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 <config_dir>/m40h/config.toml）
    #[arg(long = "config-file", global = true)]
    config_file: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出候选设备
    List {
        #[command(flatten)]
        args: ListCommand,
    },

    /// 监控按键与 ADC 事件
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 设置单个 LED
    Led {
        #[command(flatten)]
        args: LedCommand,
    },

    /// LED 自检
    Test {
        #[command(flatten)]
        args: TestCommand,
    },

    /// 设置全局亮度
    Intensity {
        #[command(flatten)]
        args: IntensityCommand,
    },

    /// 熄灭全部 LED
    Clear {
        #[command(flatten)]
        args: ClearCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("m40h_cli={level}").parse()?)
                .add_directive(format!("m40h_driver={level}").parse()?),
        )
        .init();

    let path = cli.config_file;

    match cli.command {
        Commands::Config(cmd) => cmd.execute(path),
        Commands::List { args } => args.execute(&load_config(path.as_deref())?),
        Commands::Monitor { args } => args.execute(&load_config(path.as_deref())?),
        Commands::Led { args } => args.execute(&load_config(path.as_deref())?),
        Commands::Test { args } => args.execute(&load_config(path.as_deref())?),
        Commands::Intensity { args } => args.execute(&load_config(path.as_deref())?),
        Commands::Clear { args } => args.execute(&load_config(path.as_deref())?),
    }
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    match path {
        Some(path) => CliConfig::load_from(path),
        None => CliConfig::load(),
    }
}
