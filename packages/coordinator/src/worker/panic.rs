//! Panic payloads and backtraces for contained executor panics.
//!
//! By the time `catch_unwind` returns, the panicking frames are gone. A
//! chained panic hook captures the backtrace on the panicking thread; the
//! worker collects it right after catching, on the same poll. Only panics
//! raised while an executor is being polled are captured.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::Once;

use futures::future::poll_fn;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

static INSTALL: Once = Once::new();

/// Install the capturing hook once per process, keeping the previous hook.
pub(crate) fn install_backtrace_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if CAPTURING.get() {
                let backtrace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
}

/// Resets the capture flag on drop, including while unwinding.
struct CaptureGuard {
    previous: bool,
}

impl CaptureGuard {
    fn enter() -> Self {
        Self {
            previous: CAPTURING.replace(true),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.set(self.previous);
    }
}

/// Poll `fut` with backtrace capture switched on for this thread.
pub(crate) async fn capture_backtraces<F: Future>(fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    poll_fn(|cx| {
        let _guard = CaptureGuard::enter();
        fut.as_mut().poll(cx)
    })
    .await
}

/// Backtrace of the most recent captured panic on this thread.
pub(crate) fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
