//! C FFI - entry points for the native runtime
//!
//! Design: thin `extern "C"` wrappers over [`Bridge`](crate::Bridge) with:
//! 1. Bridge lifecycle (new, free, module registration)
//! 2. The invoke callback and result release
//! 3. Error propagation via status codes plus a thread-local message
//!
//! No panic crosses the boundary; every entry point catches unwinds and
//! reports them as a failed status.

mod bridge;
mod invoke;

pub use bridge::{hyperion_bridge_free, hyperion_bridge_new, hyperion_initialize_assembly, BridgeHandle};
pub use invoke::{hyperion_invoke_method, hyperion_value_free};

use core::ffi::c_char;
use std::cell::RefCell;
use std::ffi::CString;

use crate::config::BridgeConfig;
use crate::logging::{self, debug, LogConfig};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record the failure of the current call on this thread
pub(crate) fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(text));
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the last failed call on this thread, or null.
///
/// The pointer stays valid until the next failing call on the same thread.
#[no_mangle]
pub extern "C" fn hyperion_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(core::ptr::null(), |message| message.as_ptr())
    })
}

/// Initialize logging from the `[logging]` table of the bridge
/// configuration, overridden by the `HYPERION_LOG_*` environment variables
#[no_mangle]
pub extern "C" fn hyperion_bridge_init_logging() {
    let config = BridgeConfig::from_env()
        .map(|config| LogConfig::from_settings(&config.logging))
        .unwrap_or_else(|_| LogConfig::from_env());
    logging::init_with_config(config);
    debug!("FFI logging ready");
}

/// Text of the last error, for Rust callers
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|m| m.to_string_lossy().into_owned()))
}
