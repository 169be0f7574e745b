//! Host-side callables and the decoded arguments they receive
//!
//! A registered method is stored as an `Arc<dyn NativeCallable>`. The
//! marshaller builds a [`CallArgs`] from the native argument cells and the
//! callable reads typed values out of it.

use core::any::{type_name, Any};
use core::fmt;
use smallvec::SmallVec;
use std::sync::Arc;

use super::types::{BlittableValue, Value};
use crate::cache::ManagedHandle;
use crate::handles::ReferenceToken;

/// Shared host object as stored in the object cache
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// Callable registered as a bridge method
pub trait NativeCallable: Send + Sync {
    fn call(&self, args: &CallArgs) -> Result<Value, CallError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&CallArgs) -> Result<Value, CallError> + Send + Sync,
{
    #[inline]
    fn call(&self, args: &CallArgs) -> Result<Value, CallError> {
        (self)(args)
    }
}

/// Errors raised by a host method while reading its arguments or running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    ArgumentIndex { index: usize, len: usize },
    ArgumentType { index: usize, expected: &'static str, found: &'static str },
    NullString { index: usize },
    NoReceiver,
    ReceiverType { expected: &'static str },
    Failed(String),
}

impl CallError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgumentIndex { index, len } => {
                write!(f, "Argument index {} out of range for {} arguments", index, len)
            }
            Self::ArgumentType { index, expected, found } => {
                write!(f, "Argument {} is {}, expected {}", index, found, expected)
            }
            Self::NullString { index } => write!(f, "Argument {} is a null string", index),
            Self::NoReceiver => write!(f, "Static method has no receiver"),
            Self::ReceiverType { expected } => write!(f, "Receiver is not a '{}'", expected),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CallError {}

/// Decoded arguments of one invocation
pub struct CallArgs {
    receiver: Option<HostObject>,
    values: SmallVec<[Value; 4]>,
    objects: SmallVec<[(usize, HostObject); 2]>,
}

impl CallArgs {
    pub(crate) fn new(receiver: Option<HostObject>) -> Self {
        Self {
            receiver,
            values: SmallVec::new(),
            objects: SmallVec::new(),
        }
    }

    /// Arguments without a receiver, for calling a callable directly
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            receiver: None,
            values: values.into_iter().collect(),
            objects: SmallVec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub(crate) fn push_object(&mut self, token: ReferenceToken, object: HostObject) {
        self.objects.push((self.values.len(), object));
        self.values.push(Value::Object(token));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Result<&Value, CallError> {
        self.values.get(index).ok_or(CallError::ArgumentIndex {
            index,
            len: self.values.len(),
        })
    }

    /// Receiver of an instance method, downcast to `T`
    pub fn this<T: Any + Send + Sync>(&self) -> Result<Arc<T>, CallError> {
        let receiver = self.receiver.clone().ok_or(CallError::NoReceiver)?;
        receiver
            .downcast::<T>()
            .map_err(|_| CallError::ReceiverType { expected: type_name::<T>() })
    }

    /// Object argument resolved through the cache, downcast to `T`
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, CallError> {
        let found = self.get(index)?;
        let object = self
            .objects
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, object)| object.clone())
            .ok_or(CallError::ArgumentType {
                index,
                expected: "object",
                found: found.tag().name(),
            })?;
        object.downcast::<T>().map_err(|_| CallError::ArgumentType {
            index,
            expected: type_name::<T>(),
            found: "object",
        })
    }

    pub fn bool(&self, index: usize) -> Result<bool, CallError> {
        match self.get(index)? {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch(index, "bool", other)),
        }
    }

    pub fn i8(&self, index: usize) -> Result<i8, CallError> {
        match self.get(index)? {
            Value::I8(v) => Ok(*v),
            other => Err(mismatch(index, "i8", other)),
        }
    }

    pub fn i16(&self, index: usize) -> Result<i16, CallError> {
        match self.get(index)? {
            Value::I16(v) => Ok(*v),
            other => Err(mismatch(index, "i16", other)),
        }
    }

    pub fn i32(&self, index: usize) -> Result<i32, CallError> {
        match self.get(index)? {
            Value::I32(v) => Ok(*v),
            other => Err(mismatch(index, "i32", other)),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64, CallError> {
        match self.get(index)? {
            Value::I64(v) => Ok(*v),
            other => Err(mismatch(index, "i64", other)),
        }
    }

    pub fn u8(&self, index: usize) -> Result<u8, CallError> {
        match self.get(index)? {
            Value::U8(v) => Ok(*v),
            other => Err(mismatch(index, "u8", other)),
        }
    }

    pub fn u16(&self, index: usize) -> Result<u16, CallError> {
        match self.get(index)? {
            Value::U16(v) => Ok(*v),
            other => Err(mismatch(index, "u16", other)),
        }
    }

    pub fn u32(&self, index: usize) -> Result<u32, CallError> {
        match self.get(index)? {
            Value::U32(v) => Ok(*v),
            other => Err(mismatch(index, "u32", other)),
        }
    }

    pub fn u64(&self, index: usize) -> Result<u64, CallError> {
        match self.get(index)? {
            Value::U64(v) => Ok(*v),
            other => Err(mismatch(index, "u64", other)),
        }
    }

    pub fn f32(&self, index: usize) -> Result<f32, CallError> {
        match self.get(index)? {
            Value::F32(v) => Ok(*v),
            other => Err(mismatch(index, "f32", other)),
        }
    }

    pub fn f64(&self, index: usize) -> Result<f64, CallError> {
        match self.get(index)? {
            Value::F64(v) => Ok(*v),
            other => Err(mismatch(index, "f64", other)),
        }
    }

    /// String argument; `None` for an explicit null reference
    pub fn opt_str(&self, index: usize) -> Result<Option<&str>, CallError> {
        match self.get(index)? {
            Value::Str(v) => Ok(v.as_deref()),
            other => Err(mismatch(index, "string", other)),
        }
    }

    /// Non-null string argument
    pub fn str(&self, index: usize) -> Result<&str, CallError> {
        self.opt_str(index)?.ok_or(CallError::NullString { index })
    }

    /// Raw bytes of a value-type argument
    pub fn struct_bytes(&self, index: usize) -> Result<&[u8], CallError> {
        match self.get(index)? {
            Value::Struct(v) => Ok(&v.bytes),
            other => Err(mismatch(index, "struct", other)),
        }
    }

    /// Value-type argument reinterpreted as `T`
    pub fn read<T: BlittableValue>(&self, index: usize) -> Result<T, CallError> {
        match self.get(index)? {
            Value::Struct(v) => v.read::<T>().ok_or(CallError::ArgumentType {
                index,
                expected: type_name::<T>(),
                found: "struct",
            }),
            other => Err(mismatch(index, type_name::<T>(), other)),
        }
    }

    pub fn handle(&self, index: usize) -> Result<ManagedHandle, CallError> {
        match self.get(index)? {
            Value::Handle(v) => Ok(*v),
            other => Err(mismatch(index, "handle", other)),
        }
    }
}

impl fmt::Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("has_receiver", &self.receiver.is_some())
            .field("values", &self.values)
            .finish()
    }
}

fn mismatch(index: usize, expected: &'static str, found: &Value) -> CallError {
    CallError::ArgumentType {
        index,
        expected,
        found: found.tag().name(),
    }
}
