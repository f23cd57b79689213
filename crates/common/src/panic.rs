//! Panic 捕获辅助
//!
//! 任务边界和请求边界把 panic 转换为 `PanicReport`，记录日志后交给可选的崩溃上报回调。
//!
//! `catch_unwind` 返回时 panic 现场的栈已经展开，所以调用栈要在 panic 发生时记录：
//! `install_panic_hook` 注册一个全局 hook，把当前线程的调用栈存进线程局部变量，
//! `PanicReport::capture` 在同一线程上取出。

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::{Arc, Once};

use tracing::error;

/// 未安装 hook 或栈已被取走时的占位
pub const BACKTRACE_UNAVAILABLE: &str = "<backtrace unavailable>";

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// 安装记录 panic 现场调用栈的全局 hook，重复调用只生效一次
///
/// 原有的 hook 会继续被调用，默认的 stderr 输出不受影响。
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take().map(|bt| bt.to_string()))
}

/// 崩溃上报回调（例如接入 Sentry）
pub type PanicHook = Arc<dyn Fn(&PanicReport) + Send + Sync>;

/// 一次被捕获的 panic
#[derive(Debug, Clone)]
pub struct PanicReport {
    /// 发生位置，例如任务名或 RPC 方法名
    pub origin: String,
    /// panic 携带的消息
    pub message: String,
    /// panic 发生时的调用栈
    pub backtrace: String,
}

impl PanicReport {
    /// 从 `catch_unwind` 得到的 payload 构造报告
    ///
    /// 必须在发生 panic 的线程上调用，否则拿不到现场调用栈。
    pub fn capture(origin: impl Into<String>, payload: &(dyn Any + Send)) -> Self {
        Self {
            origin: origin.into(),
            message: panic_message(payload),
            backtrace: take_backtrace().unwrap_or_else(|| BACKTRACE_UNAVAILABLE.to_string()),
        }
    }

    /// 记录错误日志，并调用上报回调
    pub fn report(&self, kind: &str, hook: Option<&PanicHook>) {
        error!(
            origin = %self.origin,
            panic.message = %self.message,
            panic.stack = %self.backtrace,
            "{} panicked",
            kind
        );
        if let Some(hook) = hook {
            hook(self);
        }
    }
}

/// 提取 panic payload 中的消息
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
