//! Bridge lifecycle over the C ABI

use core::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use super::{clear_last_error, set_last_error};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, InvalidHandleError};
use crate::handles::ClassHolderContext;
use crate::interop::{STATUS_INVALID_ARGUMENT, STATUS_OK};
use crate::logging::{info, log_ffi_error};
use crate::registry::ModuleSource;
use crate::runtime::{CallbackRuntime, NativeCallbacks};

/// Owning handle handed to native code
pub struct BridgeHandle {
    pub bridge: Arc<Bridge>,
}

/// Create a bridge over a native callback table.
///
/// Configuration comes from `HYPERION_BRIDGE_CONFIG` when set. Returns null
/// if `callbacks` is null or the configuration cannot be loaded.
///
/// # Safety
/// `callbacks` must be null or point at a fully initialized table whose
/// functions stay callable from any thread until the bridge is freed.
#[no_mangle]
pub unsafe extern "C" fn hyperion_bridge_new(callbacks: *const NativeCallbacks) -> *mut BridgeHandle {
    if callbacks.is_null() {
        set_last_error("null callback table");
        return core::ptr::null_mut();
    }
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log_ffi_error("hyperion_bridge_new", &e.to_string());
            set_last_error(e.to_string());
            return core::ptr::null_mut();
        }
    };

    let runtime = Arc::new(CallbackRuntime::new(*callbacks));
    let bridge = Bridge::new(runtime, config);
    info!("bridge created");
    clear_last_error();
    Box::into_raw(Box::new(BridgeHandle { bridge }))
}

/// Destroy a bridge created by [`hyperion_bridge_new`].
///
/// # Safety
/// `handle` must be null or a live handle from [`hyperion_bridge_new`]. The
/// native runtime must not call the installed invoke callback afterwards.
#[no_mangle]
pub unsafe extern "C" fn hyperion_bridge_free(handle: *mut BridgeHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Load the module at `path` and register its types under `ctx`.
///
/// Returns 0 on success, a negative status otherwise; per-type failures are
/// logged and do not fail the call.
///
/// # Safety
/// `handle` must be a live bridge handle and `path` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn hyperion_initialize_assembly(
    handle: *const BridgeHandle,
    ctx: usize,
    path: *const c_char,
) -> i32 {
    if handle.is_null() {
        let err = BridgeError::from(InvalidHandleError::NullBridge);
        set_last_error(err.to_string());
        return err.status_code();
    }
    if path.is_null() {
        set_last_error("null module path");
        return STATUS_INVALID_ARGUMENT;
    }
    let Ok(path) = CStr::from_ptr(path).to_str() else {
        set_last_error("module path is not valid UTF-8");
        return STATUS_INVALID_ARGUMENT;
    };

    let bridge = &(*handle).bridge;
    let source = ModuleSource::Path(PathBuf::from(path));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        bridge.register_assembly(ClassHolderContext::from_raw(ctx), &source)
    }));

    match outcome {
        Ok(Ok(_)) => {
            clear_last_error();
            STATUS_OK
        }
        Ok(Err(e)) => {
            let err = BridgeError::from(e);
            log_ffi_error("hyperion_initialize_assembly", &err.to_string());
            set_last_error(err.to_string());
            err.status_code()
        }
        Err(_) => {
            let err = BridgeError::Panicked("module registration panicked".into());
            log_ffi_error("hyperion_initialize_assembly", &err.to_string());
            set_last_error(err.to_string());
            err.status_code()
        }
    }
}
