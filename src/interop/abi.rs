//! C ABI shapes shared with the native runtime
//!
//! Results cross the boundary as a [`RawValue`]. String and struct payloads
//! are allocated by the bridge and must be returned through
//! [`free_raw_value`] (exported as `hyperion_value_free`).

use core::ffi::{c_char, c_void};
use std::ffi::CString;

use super::types::{Cell, StructLayout, StructValue, TypeTag, Value};
use crate::cache::ManagedHandle;
use crate::error::MarshalError;
use crate::handles::{ReferenceToken, TypeHash};

/// Invocation callback installed into the native runtime.
///
/// `user_data` is the pointer passed alongside the function in
/// `set_invoke_method_function`. Returns 0 on success or a negative status.
pub type InvokeMethodFn = unsafe extern "C" fn(
    user_data: *const c_void,
    method: usize,
    cells: *const Cell,
    cell_count: usize,
    out: *mut RawValue,
) -> i32;

/// Status returned on success
pub const STATUS_OK: i32 = 0;
/// Status for a null or malformed argument to a C entry point
pub const STATUS_INVALID_ARGUMENT: i32 = -7;

/// Method metadata handed to `register_method`
#[repr(C)]
#[derive(Debug)]
pub struct RawMethodMetadata {
    pub param_count: u32,
    pub param_tags: *const u8,
    /// Type hashes of struct parameters, zero for other tags
    pub param_types: *const u64,
    pub return_tag: u8,
    pub is_static: u8,
    pub signature_hash: u64,
}

/// Result value written back to the native caller
#[repr(C)]
#[derive(Debug)]
pub struct RawValue {
    pub tag: u8,
    /// Primitive payload, handle bits, or reference token
    pub word: u64,
    /// Struct type hash, zero for other tags
    pub type_hash: u64,
    /// Bridge-owned string or struct bytes; null for a null string
    pub data: *mut u8,
    pub len: usize,
}

impl Default for RawValue {
    fn default() -> Self {
        Self {
            tag: TypeTag::Void.code(),
            word: 0,
            type_hash: 0,
            data: core::ptr::null_mut(),
            len: 0,
        }
    }
}

impl RawValue {
    /// Convert a host result into its C form, allocating payloads
    pub fn from_value(value: Value) -> Result<Self, MarshalError> {
        let tag = value.tag().code();
        let mut raw = Self { tag, ..Self::default() };
        match value {
            Value::Void => {}
            Value::Bool(v) => raw.word = v as u64,
            Value::I8(v) => raw.word = v as i64 as u64,
            Value::I16(v) => raw.word = v as i64 as u64,
            Value::I32(v) => raw.word = v as i64 as u64,
            Value::I64(v) => raw.word = v as u64,
            Value::U8(v) => raw.word = v as u64,
            Value::U16(v) => raw.word = v as u64,
            Value::U32(v) => raw.word = v as u64,
            Value::U64(v) => raw.word = v,
            Value::F32(v) => raw.word = v.to_bits() as u64,
            Value::F64(v) => raw.word = v.to_bits(),
            Value::Str(None) => {}
            Value::Str(Some(text)) => {
                let text = CString::new(text).map_err(|_| MarshalError::InteriorNul)?;
                raw.len = text.as_bytes().len();
                raw.data = text.into_raw() as *mut u8;
            }
            Value::Struct(v) => {
                raw.type_hash = v.layout.type_hash.0;
                let bytes: Box<[u8]> = v.bytes.into_vec().into_boxed_slice();
                raw.len = bytes.len();
                raw.data = Box::into_raw(bytes) as *mut u8;
            }
            Value::Handle(h) => raw.word = h.to_bits(),
            Value::Object(token) => raw.word = token.as_raw() as u64,
        }
        Ok(raw)
    }

    /// Read the value back out without taking ownership of payloads.
    ///
    /// # Safety
    /// `data`/`len` must describe a live payload produced by
    /// [`RawValue::from_value`].
    pub unsafe fn read(&self, ret: TypeTag) -> Value {
        match ret {
            TypeTag::Void => Value::Void,
            TypeTag::Bool => Value::Bool(self.word != 0),
            TypeTag::I8 => Value::I8(self.word as i8),
            TypeTag::I16 => Value::I16(self.word as i16),
            TypeTag::I32 => Value::I32(self.word as i32),
            TypeTag::I64 => Value::I64(self.word as i64),
            TypeTag::U8 => Value::U8(self.word as u8),
            TypeTag::U16 => Value::U16(self.word as u16),
            TypeTag::U32 => Value::U32(self.word as u32),
            TypeTag::U64 => Value::U64(self.word),
            TypeTag::F32 => Value::F32(f32::from_bits(self.word as u32)),
            TypeTag::F64 => Value::F64(f64::from_bits(self.word)),
            TypeTag::Str if self.data.is_null() => Value::Str(None),
            TypeTag::Str => {
                let text = core::ffi::CStr::from_ptr(self.data as *const c_char);
                Value::Str(Some(text.to_string_lossy().into_owned()))
            }
            TypeTag::Struct(layout) => {
                let bytes = if self.data.is_null() {
                    &[][..]
                } else {
                    core::slice::from_raw_parts(self.data, self.len)
                };
                let layout = StructLayout { type_hash: TypeHash(self.type_hash), ..layout };
                Value::Struct(StructValue::from_bytes(layout, bytes))
            }
            TypeTag::Handle => Value::Handle(ManagedHandle::from_bits(self.word)),
            TypeTag::Object => Value::Object(ReferenceToken::from_raw(self.word as usize)),
        }
    }
}

/// Release payloads owned by a [`RawValue`] and reset it to void.
///
/// # Safety
/// `value` must have been produced by [`RawValue::from_value`] and not freed.
pub unsafe fn free_raw_value(value: &mut RawValue) {
    if !value.data.is_null() {
        if value.tag == TypeTag::Str.code() {
            drop(CString::from_raw(value.data as *mut c_char));
        } else {
            let slice = core::ptr::slice_from_raw_parts_mut(value.data, value.len);
            drop(Box::from_raw(slice));
        }
    }
    *value = RawValue::default();
}
