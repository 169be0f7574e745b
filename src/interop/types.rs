//! Type tags and values crossing the native boundary
//!
//! A [`TypeTag`] is the declared type of one parameter or return slot. A
//! [`Value`] is the decoded, owned form of one argument or result.

use core::fmt;
use smallvec::SmallVec;

use crate::cache::ManagedHandle;
use crate::handles::{ReferenceToken, TypeHash};

/// One machine-word argument cell
pub type Cell = usize;

/// Size and identity of a value type passed by copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructLayout {
    pub type_hash: TypeHash,
    pub size: usize,
    pub align: usize,
}

impl StructLayout {
    #[inline]
    pub const fn new(type_hash: TypeHash, size: usize, align: usize) -> Self {
        Self { type_hash, size, align }
    }

    /// Layout of a blittable Rust type registered under `name`
    pub fn of<T: BlittableValue>(name: &str) -> Self {
        Self::new(
            TypeHash::from_name(name),
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
        )
    }
}

/// Declared type of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// NUL-terminated UTF-8, passed as a pointer to a pointer
    Str,
    /// Value type copied out of the bytes the cell points at
    Struct(StructLayout),
    /// Pointer to an 8-byte [`ManagedHandle`] blob
    Handle,
    /// Object cache reference token stored in the cell
    Object,
}

impl TypeTag {
    /// Stable numeric code used in native method metadata
    #[inline]
    pub const fn code(self) -> u8 {
        match self {
            Self::Void => 0,
            Self::Bool => 1,
            Self::I8 => 2,
            Self::I16 => 3,
            Self::I32 => 4,
            Self::I64 => 5,
            Self::U8 => 6,
            Self::U16 => 7,
            Self::U32 => 8,
            Self::U64 => 9,
            Self::F32 => 10,
            Self::F64 => 11,
            Self::Str => 12,
            Self::Struct(_) => 13,
            Self::Handle => 14,
            Self::Object => 15,
        }
    }

    /// Size of the decoded payload in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Str | Self::Object => core::mem::size_of::<usize>(),
            Self::Handle => core::mem::size_of::<ManagedHandle>(),
            Self::Struct(layout) => layout.size,
        }
    }

    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Whether the cell carries the value itself rather than a pointer
    #[inline]
    pub const fn is_direct(self) -> bool {
        self.is_integral() || self.is_float() || matches!(self, Self::Bool | Self::Object)
    }

    /// Short name for diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Str => "string",
            Self::Struct(_) => "struct",
            Self::Handle => "handle",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Struct(layout) => write!(f, "struct {}({} bytes)", layout.type_hash, layout.size),
            other => f.write_str(other.name()),
        }
    }
}

/// Marker for plain-data value types that may be copied byte-for-byte
/// across the boundary.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (or `#[repr(transparent)]`), contain no
/// padding bytes, no pointers or references, and every bit pattern of
/// `size_of::<Self>()` bytes must be a valid value.
pub unsafe trait BlittableValue: Copy + Send + Sync + 'static {}

unsafe impl BlittableValue for u8 {}
unsafe impl BlittableValue for u16 {}
unsafe impl BlittableValue for u32 {}
unsafe impl BlittableValue for u64 {}
unsafe impl BlittableValue for i32 {}
unsafe impl BlittableValue for i64 {}
unsafe impl BlittableValue for f32 {}
unsafe impl BlittableValue for f64 {}
unsafe impl<T: BlittableValue, const N: usize> BlittableValue for [T; N] {}

/// Bytes of one value-type argument or result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructValue {
    pub layout: StructLayout,
    pub bytes: SmallVec<[u8; 16]>,
}

impl StructValue {
    pub fn from_bytes(layout: StructLayout, bytes: &[u8]) -> Self {
        Self {
            layout,
            bytes: SmallVec::from_slice(bytes),
        }
    }

    /// Copy a blittable Rust value into its byte form
    pub fn from_value<T: BlittableValue>(layout: StructLayout, value: &T) -> Self {
        Self::from_bytes(layout, blittable_bytes(value))
    }

    /// Reinterpret the bytes as `T`, if the sizes agree
    pub fn read<T: BlittableValue>(&self) -> Option<T> {
        if self.bytes.len() != core::mem::size_of::<T>() {
            return None;
        }
        // SAFETY: length checked above; T accepts any bit pattern and
        // read_unaligned has no alignment requirement.
        Some(unsafe { core::ptr::read_unaligned(self.bytes.as_ptr() as *const T) })
    }
}

/// View a blittable value as its raw bytes
pub fn blittable_bytes<T: BlittableValue>(value: &T) -> &[u8] {
    // SAFETY: BlittableValue guarantees no padding, so every byte is initialized.
    unsafe { core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>()) }
}

/// Decoded argument or result value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// `None` is an explicit null reference, distinct from `Some("")`
    Str(Option<String>),
    Struct(StructValue),
    Handle(ManagedHandle),
    Object(ReferenceToken),
}

impl Value {
    /// Tag describing this value.
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Void => TypeTag::Void,
            Self::Bool(_) => TypeTag::Bool,
            Self::I8(_) => TypeTag::I8,
            Self::I16(_) => TypeTag::I16,
            Self::I32(_) => TypeTag::I32,
            Self::I64(_) => TypeTag::I64,
            Self::U8(_) => TypeTag::U8,
            Self::U16(_) => TypeTag::U16,
            Self::U32(_) => TypeTag::U32,
            Self::U64(_) => TypeTag::U64,
            Self::F32(_) => TypeTag::F32,
            Self::F64(_) => TypeTag::F64,
            Self::Str(_) => TypeTag::Str,
            Self::Struct(value) => TypeTag::Struct(value.layout),
            Self::Handle(_) => TypeTag::Handle,
            Self::Object(_) => TypeTag::Object,
        }
    }

    /// Whether this value satisfies a declared tag
    pub fn matches(&self, tag: TypeTag) -> bool {
        match (self, tag) {
            (Self::Struct(value), TypeTag::Struct(layout)) => {
                value.layout.type_hash == layout.type_hash && value.bytes.len() == layout.size
            }
            (value, tag) => value.tag() == tag,
        }
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v as i64),
            Self::I16(v) => Some(v as i64),
            Self::I32(v) => Some(v as i64),
            Self::I64(v) => Some(v),
            Self::U8(v) => Some(v as i64),
            Self::U16(v) => Some(v as i64),
            Self::U32(v) => Some(v as i64),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                #[inline]
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    ManagedHandle => Handle,
    ReferenceToken => Object,
    StructValue => Struct,
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Some(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Some(value.to_owned()))
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        Value::Str(value)
    }
}
