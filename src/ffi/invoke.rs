//! The invoke callback

use core::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use super::{clear_last_error, set_last_error};
use crate::bridge::Bridge;
use crate::error::{BridgeError, InvalidHandleError};
use crate::handles::MethodHandle;
use crate::interop::{free_raw_value, ArgBuffer, Cell, RawValue, STATUS_OK};
use crate::logging::log_invoke_error;

/// Invoke callback installed with `set_invoke_method_function`.
///
/// `user_data` is the bridge address passed at installation. On success the
/// result is written to `out` (when non-null) and must be released with
/// [`hyperion_value_free`].
///
/// # Safety
/// `user_data` must be the pointer the bridge installed, with the bridge
/// still alive. `cells` must point at `cell_count` cells laid out per the
/// method's signature, and `out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn hyperion_invoke_method(
    user_data: *const c_void,
    method: usize,
    cells: *const Cell,
    cell_count: usize,
    out: *mut RawValue,
) -> i32 {
    let method = MethodHandle::from_raw(method);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<RawValue, BridgeError> {
        let bridge = (user_data as *const Bridge)
            .as_ref()
            .ok_or(InvalidHandleError::NullBridge)?;
        let args = ArgBuffer::from_raw_parts(cells, cell_count);
        let value = bridge.invoke(method, args)?;
        Ok(RawValue::from_value(value)?)
    }));

    let result = outcome.unwrap_or_else(|_| Err(BridgeError::Panicked("invoke callback panicked".into())));
    match result {
        Ok(raw) => {
            if let Some(out) = out.as_mut() {
                *out = raw;
            } else {
                let mut raw = raw;
                free_raw_value(&mut raw);
            }
            clear_last_error();
            STATUS_OK
        }
        Err(e) => {
            log_invoke_error(method, &e);
            set_last_error(e.to_string());
            if let Some(out) = out.as_mut() {
                *out = RawValue::default();
            }
            e.status_code()
        }
    }
}

/// Release payloads of a result written by [`hyperion_invoke_method`]
///
/// # Safety
/// `value` must be null or a result produced by this bridge and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn hyperion_value_free(value: *mut RawValue) {
    if let Some(value) = value.as_mut() {
        free_raw_value(value);
    }
}
