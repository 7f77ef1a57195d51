//! 订阅者注册表
//!
//! 按键与 ADC 各一个槽位，每个槽位最多一个监听者。IO 线程派发回调期间，
//! 对应槽位处于 servicing 状态，此时任何订阅/取消订阅都会失败，而不是在
//! 回调执行中途修改槽位。
//!
//! # 示例
//!
//! ```rust
//! use m40h_driver::registry::SubscriberRegistry;
//! use m40h_protocol::SwitchEvent;
//!
//! let registry = SubscriberRegistry::new();
//! let handle = registry
//!     .subscribe_switch(|event: SwitchEvent| println!("{:?}", event))
//!     .unwrap();
//! registry.unsubscribe_switch(handle).unwrap();
//! ```

use crate::error::SubscribeError;
use m40h_protocol::{AdcEvent, SwitchEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::error;

/// 按键监听者
///
/// 回调在 IO 线程上执行，应尽快返回；耗时工作应转交其他线程。
pub trait SwitchListener: Send + Sync {
    fn on_switch(&self, event: SwitchEvent);
}

/// ADC 监听者（只接收通过去抖的采样）
pub trait AdcListener: Send + Sync {
    fn on_adc(&self, event: AdcEvent);
}

impl<F> SwitchListener for F
where
    F: Fn(SwitchEvent) + Send + Sync,
{
    fn on_switch(&self, event: SwitchEvent) {
        self(event)
    }
}

impl<F> AdcListener for F
where
    F: Fn(AdcEvent) + Send + Sync,
{
    fn on_adc(&self, event: AdcEvent) {
        self(event)
    }
}

/// 订阅凭据，取消订阅时必须出示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// 退出作用域时清除 servicing 标志（回调 panic 时同样生效）
struct ServicingGuard<'a>(&'a AtomicBool);

impl Drop for ServicingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Slot<L: ?Sized> {
    kind: &'static str,
    entry: RwLock<Option<(ListenerHandle, Arc<L>)>>,
    servicing: AtomicBool,
}

impl<L: ?Sized> Slot<L> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entry: RwLock::new(None),
            servicing: AtomicBool::new(false),
        }
    }

    /// 须在持有写锁时调用，与 `dispatch` 在读锁内置位 servicing 构成互斥
    fn ensure_idle(&self) -> Result<(), SubscribeError> {
        if self.servicing.load(Ordering::Acquire) {
            error!(
                "Attempted to change {} subscription while dispatching to it",
                self.kind
            );
            return Err(SubscribeError::Dispatching);
        }
        Ok(())
    }

    fn subscribe(&self, handle: ListenerHandle, listener: Arc<L>) -> Result<(), SubscribeError> {
        let mut entry = self.entry.write();
        self.ensure_idle()?;
        if entry.is_some() {
            return Err(SubscribeError::SlotOccupied);
        }
        *entry = Some((handle, listener));
        Ok(())
    }

    fn unsubscribe(&self, handle: ListenerHandle) -> Result<(), SubscribeError> {
        let mut entry = self.entry.write();
        self.ensure_idle()?;
        match entry.as_ref() {
            Some((current, _)) if *current == handle => {
                *entry = None;
                Ok(())
            },
            _ => Err(SubscribeError::NotSubscribed),
        }
    }

    fn is_occupied(&self) -> bool {
        self.entry.read().is_some()
    }

    fn clear(&self) -> bool {
        self.entry.write().take().is_some()
    }

    /// 调用监听者，返回槽位是否有监听者
    ///
    /// servicing 在读锁内置位，`unsubscribe` 返回 Ok 之后不会再调用旧监听者。
    /// 回调前释放读锁，回调内的订阅操作只会看到 servicing 标志而不会死锁。
    fn dispatch(&self, call: impl FnOnce(&L)) -> bool {
        let (listener, _guard) = {
            let entry = self.entry.read();
            let Some((_, listener)) = entry.as_ref() else {
                return false;
            };
            self.servicing.store(true, Ordering::Release);
            (Arc::clone(listener), ServicingGuard(&self.servicing))
        };
        call(listener.as_ref());
        true
    }
}

/// 按键与 ADC 监听者注册表
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    switch: Slot<dyn SwitchListener>,
    adc: Slot<dyn AdcListener>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            switch: Slot::new("switch"),
            adc: Slot::new("adc"),
        }
    }

    fn next_handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe_switch(
        &self,
        listener: impl SwitchListener + 'static,
    ) -> Result<ListenerHandle, SubscribeError> {
        let handle = self.next_handle();
        self.switch.subscribe(handle, Arc::new(listener))?;
        Ok(handle)
    }

    pub fn unsubscribe_switch(&self, handle: ListenerHandle) -> Result<(), SubscribeError> {
        self.switch.unsubscribe(handle)
    }

    pub fn subscribe_adc(
        &self,
        listener: impl AdcListener + 'static,
    ) -> Result<ListenerHandle, SubscribeError> {
        let handle = self.next_handle();
        self.adc.subscribe(handle, Arc::new(listener))?;
        Ok(handle)
    }

    pub fn unsubscribe_adc(&self, handle: ListenerHandle) -> Result<(), SubscribeError> {
        self.adc.unsubscribe(handle)
    }

    pub fn has_switch_listener(&self) -> bool {
        self.switch.is_occupied()
    }

    pub fn has_adc_listener(&self) -> bool {
        self.adc.is_occupied()
    }

    /// 派发按键事件，无监听者时返回 false
    pub fn notify_switch(&self, event: SwitchEvent) -> bool {
        self.switch.dispatch(|l| l.on_switch(event))
    }

    /// 派发 ADC 事件，无监听者时返回 false
    pub fn notify_adc(&self, event: AdcEvent) -> bool {
        self.adc.dispatch(|l| l.on_adc(event))
    }

    /// 移除所有监听者，返回被移除的数量
    pub fn clear(&self) -> usize {
        self.switch.clear() as usize + self.adc.clear() as usize
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn press(row: u8, col: u8) -> SwitchEvent {
        SwitchEvent {
            row,
            col,
            pressed: true,
        }
    }

    #[test]
    fn test_single_slot() {
        let registry = SubscriberRegistry::new();
        let first = registry.subscribe_switch(|_: SwitchEvent| {}).unwrap();
        assert_eq!(
            registry.subscribe_switch(|_: SwitchEvent| {}).unwrap_err(),
            SubscribeError::SlotOccupied
        );

        // ADC 槽位独立
        assert!(registry.subscribe_adc(|_: AdcEvent| {}).is_ok());

        registry.unsubscribe_switch(first).unwrap();
        assert!(registry.subscribe_switch(|_: SwitchEvent| {}).is_ok());
    }

    #[test]
    fn test_unsubscribe_requires_current_handle() {
        let registry = SubscriberRegistry::new();
        assert_eq!(
            registry.unsubscribe_adc(ListenerHandle(42)).unwrap_err(),
            SubscribeError::NotSubscribed
        );

        let stale = registry.subscribe_adc(|_: AdcEvent| {}).unwrap();
        registry.unsubscribe_adc(stale).unwrap();
        let _current = registry.subscribe_adc(|_: AdcEvent| {}).unwrap();
        assert_eq!(
            registry.unsubscribe_adc(stale).unwrap_err(),
            SubscribeError::NotSubscribed
        );
        assert!(registry.has_adc_listener());
    }

    #[test]
    fn test_dispatch_reaches_listener() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            registry
                .subscribe_switch(move |event: SwitchEvent| seen.lock().push(event))
                .unwrap();
        }

        assert!(registry.notify_switch(press(1, 2)));
        assert!(!registry.notify_adc(AdcEvent { port: 0, value: 1 }));
        assert_eq!(*seen.lock(), vec![press(1, 2)]);
    }

    #[test]
    fn test_mutation_during_dispatch_fails() {
        let registry = Arc::new(SubscriberRegistry::new());
        let results = Arc::new(Mutex::new(Vec::new()));
        let own_handle = Arc::new(Mutex::new(None::<ListenerHandle>));

        let handle = {
            let weak = Arc::downgrade(&registry);
            let results = results.clone();
            let own_handle = own_handle.clone();
            registry
                .subscribe_switch(move |_: SwitchEvent| {
                    let Some(registry) = weak.upgrade() else {
                        return;
                    };
                    let Some(handle) = *own_handle.lock() else {
                        return;
                    };
                    let unsubscribed = registry.unsubscribe_switch(handle);
                    let resubscribed = registry.subscribe_switch(|_: SwitchEvent| {}).map(|_| ());
                    results.lock().extend([unsubscribed, resubscribed]);
                })
                .unwrap()
        };
        *own_handle.lock() = Some(handle);

        registry.notify_switch(press(0, 0));
        assert_eq!(
            *results.lock(),
            vec![
                Err(SubscribeError::Dispatching),
                Err(SubscribeError::Dispatching)
            ]
        );

        // 派发结束后标志复位，监听者仍在
        assert!(registry.has_switch_listener());
        registry.unsubscribe_switch(handle).unwrap();
    }

    #[test]
    fn test_other_kind_is_not_guarded() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscribed = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&registry);
            let subscribed = subscribed.clone();
            registry
                .subscribe_switch(move |_: SwitchEvent| {
                    if let Some(registry) = weak.upgrade()
                        && registry.subscribe_adc(|_: AdcEvent| {}).is_ok()
                    {
                        subscribed.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .unwrap();
        }

        registry.notify_switch(press(3, 3));
        assert_eq!(subscribed.load(Ordering::Relaxed), 1);
        assert!(registry.has_adc_listener());
    }

    #[test]
    fn test_guard_resets_after_panic() {
        let registry = SubscriberRegistry::new();
        let handle = registry
            .subscribe_switch(|event: SwitchEvent| {
                if event.pressed {
                    panic!("listener failure");
                }
            })
            .unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.notify_switch(press(0, 1));
        }));
        assert!(result.is_err());
        assert!(registry.unsubscribe_switch(handle).is_ok());
    }

    #[test]
    fn test_unsubscribed_listener_never_called_again() {
        let registry = Arc::new(SubscriberRegistry::new());
        let removed = Arc::new(AtomicBool::new(false));
        let late_calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            removed.store(false, Ordering::SeqCst);
            let handle = {
                let removed = removed.clone();
                let late_calls = late_calls.clone();
                registry
                    .subscribe_switch(move |_: SwitchEvent| {
                        if removed.load(Ordering::SeqCst) {
                            late_calls.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .unwrap()
            };

            let done = Arc::new(AtomicBool::new(false));
            let dispatcher = {
                let registry = registry.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        registry.notify_switch(press(0, 0));
                        std::thread::yield_now();
                    }
                })
            };

            // 派发期间取消订阅返回 Dispatching，重试直到成功
            while registry.unsubscribe_switch(handle).is_err() {
                std::thread::yield_now();
            }
            removed.store(true, Ordering::SeqCst);
            std::thread::yield_now();
            done.store(true, Ordering::SeqCst);
            dispatcher.join().unwrap();
        }

        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear() {
        let registry = SubscriberRegistry::new();
        registry.subscribe_switch(|_: SwitchEvent| {}).unwrap();
        registry.subscribe_adc(|_: AdcEvent| {}).unwrap();
        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.clear(), 0);
    }
}
