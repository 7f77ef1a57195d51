//! 驱动层错误类型定义

use m40h_protocol::ProtocolError;
use m40h_serial::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 命令参数超出范围
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 已持有一个设备会话
    #[error("A device is already acquired: {0}")]
    AlreadyAcquired(String),

    /// 没有发现序列号匹配的设备
    #[error("No matching device found (serial must contain {0:?})")]
    NoDevice(String),

    /// 释放操作只能在 IO 线程之外调用
    #[error("release_device() called from the IO thread")]
    ReleaseFromIoThread,

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 订阅操作失败
    #[error("Subscribe error: {0}")]
    Subscribe(#[from] SubscribeError),

    /// 无效输入（如缺少 Connector）
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// 订阅槽位错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("Listener slot already occupied")]
    SlotOccupied,

    #[error("Listener is not subscribed")]
    NotSubscribed,

    /// 在同类回调执行期间修改订阅
    #[error("Cannot change subscription while dispatching to this listener kind")]
    Dispatching,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Protocol(ProtocolError::OutOfRange {
            field: "row",
            value: 9,
            max: 7,
        });
        let msg = err.to_string();
        assert!(msg.contains("row"), "Protocol error message: {}", msg);

        let err = DriverError::Transport(TransportError::NotFound("m40h0001".into()));
        assert!(err.to_string().contains("m40h0001"));

        let err = DriverError::NoDevice("m40h".into());
        assert_eq!(
            err.to_string(),
            "No matching device found (serial must contain \"m40h\")"
        );
    }

    #[test]
    fn test_subscribe_error_conversion() {
        let err: DriverError = SubscribeError::Dispatching.into();
        assert!(matches!(err, DriverError::Subscribe(SubscribeError::Dispatching)));
    }
}
