//! 监控按键与 ADC 事件
//!
//! 回调只把事件转发到 channel，打印在主线程完成，不阻塞 IO 线程。

use super::DeviceArgs;
use crate::config::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use m40h_driver::GridCommands;
use m40h_protocol::{ADC_PORTS, AdcEvent, InputEvent, SwitchEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Args, Debug)]
pub struct MonitorCommand {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// 按下时点亮对应 LED，松开时熄灭
    #[arg(short, long)]
    pub echo: bool,

    /// 启用的 ADC 端口（可重复，如 --adc 0 --adc 2）
    #[arg(long = "adc", value_parser = clap::value_parser!(u8).range(0..ADC_PORTS as i64))]
    pub adc_ports: Vec<u8>,

    /// 监控时长（秒），默认直到 Ctrl+C
    #[arg(short, long)]
    pub duration_secs: Option<u64>,
}

impl MonitorCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
                .context("设置 Ctrl+C 处理失败")?;
        }

        let link = self.device.connect(config)?;
        let (tx, rx) = unbounded::<InputEvent>();

        let switch_handle = {
            let tx = tx.clone();
            let leds = self.echo.then(|| link.sender());
            link.subscribe_switch(move |event: SwitchEvent| {
                if let Some(leds) = &leds
                    && let Err(e) = leds.enable_led(event.row, event.col, event.pressed)
                {
                    warn!("Echo failed: {}", e);
                }
                let _ = tx.send(InputEvent::SwitchChanged(event));
            })?
        };
        let adc_handle = link.subscribe_adc(move |event: AdcEvent| {
            let _ = tx.send(InputEvent::AdcChanged(event));
        })?;

        for &port in &self.adc_ports {
            link.enable_adc(port, true)?;
        }

        println!("👀 监控中（Ctrl+C 退出）...");
        let deadline = self
            .duration_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        while running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => print_event(&event),
                Err(RecvTimeoutError::Timeout) => {
                    if !link.is_connected() && link.serial_number().is_none() {
                        println!("⚠️  设备已断开");
                        break;
                    }
                },
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for &port in &self.adc_ports {
            link.enable_adc(port, false)?;
        }
        super::flush_and_release(&link, Duration::from_millis(500))?;
        link.unsubscribe_switch(switch_handle)?;
        link.unsubscribe_adc(adc_handle)?;

        println!("📊 {}", link.metrics());
        Ok(())
    }
}

fn print_event(event: &InputEvent) {
    match event {
        InputEvent::SwitchChanged(SwitchEvent { row, col, pressed }) => {
            println!(
                "key  row={} col={} {}",
                row,
                col,
                if *pressed { "down" } else { "up" }
            );
        },
        InputEvent::AdcChanged(AdcEvent { port, value }) => {
            println!("adc  port={} value={:4}", port, value);
        },
    }
}
