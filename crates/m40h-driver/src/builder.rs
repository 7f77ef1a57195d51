//! DeviceLink 构建器

use crate::config::{DEFAULT_INTENSITY, LinkConfig, ReconnectPolicy};
use crate::error::DriverError;
use crate::link::DeviceLink;
use m40h_serial::Connector;
use std::sync::Arc;

/// DeviceLink 构建器
///
/// # Example
///
/// ```no_run
/// use m40h_driver::DeviceLinkBuilder;
///
/// // 打开指定序列号的设备，亮度 8
/// let link = DeviceLinkBuilder::new()
///     .serial("m40h0042")
///     .intensity(8)
///     .connect()
///     .unwrap();
/// ```
pub struct DeviceLinkBuilder {
    /// 设备序列号（未设置时 `connect()` 选择第一个候选设备）
    serial: Option<String>,
    /// 自定义 Connector（未设置时使用 USB 串口）
    connector: Option<Arc<dyn Connector>>,
    config: LinkConfig,
    intensity: u8,
}

impl DeviceLinkBuilder {
    pub fn new() -> Self {
        Self {
            serial: None,
            connector: None,
            config: LinkConfig::default(),
            intensity: DEFAULT_INTENSITY,
        }
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// 使用自定义 Connector（如测试用 Mock）
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// 打开设备后写入的初始亮度
    pub fn intensity(mut self, level: u8) -> Self {
        self.intensity = level;
        self
    }

    pub fn io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.io_timeout_ms = ms;
        self
    }

    pub fn join_timeout_ms(mut self, ms: u64) -> Self {
        self.config.join_timeout_ms = ms;
        self
    }

    /// ADC 去抖历史长度（2 或 3）
    pub fn adc_history(mut self, history: usize) -> Self {
        self.config.adc_history = history;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// 创建链路，不打开设备
    pub fn build(self) -> Result<DeviceLink, DriverError> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector()?,
        };
        Ok(DeviceLink::new(connector, self.config, self.intensity))
    }

    /// 创建链路并打开设备
    pub fn connect(self) -> Result<DeviceLink, DriverError> {
        let serial = self.serial.clone();
        let link = self.build()?;
        match serial {
            Some(serial) => link.acquire_device(&serial)?,
            None => {
                link.acquire_first()?;
            },
        }
        Ok(link)
    }
}

impl Default for DeviceLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "serial")]
fn default_connector() -> Result<Arc<dyn Connector>, DriverError> {
    Ok(Arc::new(m40h_serial::SerialConnector::new()))
}

#[cfg(not(feature = "serial"))]
fn default_connector() -> Result<Arc<dyn Connector>, DriverError> {
    Err(DriverError::InvalidInput(
        "no connector set and the serial backend is disabled".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use m40h_serial::mock::{MockConnector, MockDevice};

    #[test]
    fn test_builder_overrides() {
        let connector = Arc::new(MockConnector::new());
        let link = DeviceLinkBuilder::new()
            .connector(connector)
            .io_timeout_ms(5)
            .join_timeout_ms(250)
            .adc_history(3)
            .intensity(4)
            .build()
            .unwrap();

        assert_eq!(link.config().io_timeout_ms, 5);
        assert_eq!(link.config().join_timeout_ms, 250);
        assert_eq!(link.config().adc_history, 3);
        assert_eq!(link.intensity(), 4);
    }

    #[test]
    fn test_connect_picks_first_candidate() {
        let connector = Arc::new(MockConnector::new());
        connector.attach_foreign("FT232R01");
        connector.attach(MockDevice::new("m40h0007"));
        let link = DeviceLinkBuilder::new()
            .connector(connector)
            .io_timeout_ms(2)
            .connect()
            .unwrap();

        assert_eq!(link.serial_number().as_deref(), Some("m40h0007"));
        link.release_device().unwrap();
    }

    #[test]
    fn test_connect_without_device() {
        let connector = Arc::new(MockConnector::new());
        connector.attach_foreign("FT232R01");
        let result = DeviceLinkBuilder::new().connector(connector).connect();
        assert!(matches!(result, Err(DriverError::NoDevice(_))));
    }
}
