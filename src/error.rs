//! Error taxonomy for registration, marshalling, handles and lifetimes
//!
//! Every failure that can reach the native side maps to a stable negative
//! status code through [`BridgeError::status_code`].

use core::fmt;

use crate::handles::{ClassHandle, MethodHandle, ModuleId, ReferenceToken};
use crate::interop::{CallError, TypeTag};

/// Module, type or method could not be registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The module itself could not be loaded; fatal for the registration call
    ModuleLoad { path: String, reason: String },
    /// The module loaded but does not export the registration entry point
    EntryPointMissing { path: String, symbol: &'static str },
    InvalidType { name: String, reason: String },
    DuplicateType { name: String },
    UnsupportedParameter { method: String, index: usize, tag: TypeTag, reason: &'static str },
    UnsupportedReturn { method: String, tag: TypeTag },
    TooManyParameters { method: String, count: usize, max: usize },
    DuplicateMethod { type_name: String, signature: String },
    /// Native registration returned the null handle
    NullNativeHandle { kind: &'static str, name: String },
    /// Native registration returned a handle that is already in use
    DuplicateNativeHandle { name: String, handle: usize },
}

impl RegistrationError {
    /// Whether the error aborts the whole registration call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModuleLoad { .. } | Self::EntryPointMissing { .. })
    }
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModuleLoad { path, reason } => {
                write!(f, "Failed to load module '{}': {}", path, reason)
            }
            Self::EntryPointMissing { path, symbol } => {
                write!(f, "Module '{}' does not export '{}'", path, symbol)
            }
            Self::InvalidType { name, reason } => {
                write!(f, "Type '{}' cannot be described: {}", name, reason)
            }
            Self::DuplicateType { name } => write!(f, "Type '{}' is already registered", name),
            Self::UnsupportedParameter { method, index, tag, reason } => {
                write!(f, "Parameter {} ({}) of '{}' is unsupported: {}", index, tag, method, reason)
            }
            Self::UnsupportedReturn { method, tag } => {
                write!(f, "Return type {} of '{}' is unsupported", tag, method)
            }
            Self::TooManyParameters { method, count, max } => {
                write!(f, "Method '{}' declares {} parameters, limit is {}", method, count, max)
            }
            Self::DuplicateMethod { type_name, signature } => {
                write!(f, "Method '{}' is declared twice on '{}'", signature, type_name)
            }
            Self::NullNativeHandle { kind, name } => {
                write!(f, "Native runtime returned a null {} handle for '{}'", kind, name)
            }
            Self::DuplicateNativeHandle { name, handle } => {
                write!(f, "Native runtime reused handle {:#x} for '{}'", handle, name)
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Argument buffer does not match the declared signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    MissingReceiver,
    MissingArgument { index: usize, tag: TypeTag },
    CellCountMismatch { expected: usize, found: usize },
    NullPointer { index: usize, tag: TypeTag },
    InvalidUtf8 { index: usize },
    /// The cell was encoded as something that cannot be read as `tag`
    TagMismatch { index: usize, tag: TypeTag },
    /// The receiver object belongs to a different class than the method
    ReceiverMismatch { expected: ClassHandle, found: ClassHandle },
    ReturnMismatch { expected: TypeTag, found: TypeTag },
    /// A returned string contains an interior NUL and cannot be passed as C text
    InteriorNul,
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReceiver => write!(f, "Argument buffer has no receiver cell"),
            Self::MissingArgument { index, tag } => {
                write!(f, "Argument {} ({}) is missing from the buffer", index, tag)
            }
            Self::CellCountMismatch { expected, found } => {
                write!(f, "Expected {} argument cells, got {}", expected, found)
            }
            Self::NullPointer { index, tag } => {
                write!(f, "Argument {} ({}) is a null pointer", index, tag)
            }
            Self::InvalidUtf8 { index } => write!(f, "Argument {} is not valid UTF-8", index),
            Self::TagMismatch { index, tag } => {
                write!(f, "Argument {} was not encoded as {}", index, tag)
            }
            Self::ReceiverMismatch { expected, found } => {
                write!(f, "Receiver belongs to class {}, method expects {}", found, expected)
            }
            Self::ReturnMismatch { expected, found } => {
                write!(f, "Method returned {}, declared {}", found, expected)
            }
            Self::InteriorNul => write!(f, "Returned string contains an interior NUL"),
        }
    }
}

impl std::error::Error for MarshalError {}

/// Null or stale handle supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidHandleError {
    NullMethod,
    UnknownMethod(MethodHandle),
    NullDelegate,
    NullHandler,
    NullToken,
    UnknownToken(ReferenceToken),
    UnregisteredClass(&'static str),
    UnknownModule(ModuleId),
    TypeMismatch { expected: &'static str },
    NullBridge,
}

impl fmt::Display for InvalidHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullMethod => write!(f, "Null method handle"),
            Self::UnknownMethod(handle) => write!(f, "Unknown method handle {}", handle),
            Self::NullDelegate => write!(f, "Null delegate handle"),
            Self::NullHandler => write!(f, "Native runtime returned a null handler token"),
            Self::NullToken => write!(f, "Null reference token"),
            Self::UnknownToken(token) => write!(f, "Unknown reference token {}", token),
            Self::UnregisteredClass(name) => write!(f, "Type '{}' has no registered class", name),
            Self::UnknownModule(id) => write!(f, "Unknown {}", id),
            Self::TypeMismatch { expected } => write!(f, "Cached object is not a '{}'", expected),
            Self::NullBridge => write!(f, "Null bridge handle"),
        }
    }
}

impl std::error::Error for InvalidHandleError {}

/// Object behind a reference token is no longer usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeError {
    /// Entry was invalidated or its weak target was collected
    Invalidated(ReferenceToken),
    /// Slot was released and possibly reused
    StaleToken(ReferenceToken),
}

impl fmt::Display for LifetimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalidated(token) => write!(f, "Object {} is no longer valid", token),
            Self::StaleToken(token) => write!(f, "Reference token {} is stale", token),
        }
    }
}

impl std::error::Error for LifetimeError {}

/// Any failure surfaced by the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    Registration(RegistrationError),
    Marshal(MarshalError),
    InvalidHandle(InvalidHandleError),
    Lifetime(LifetimeError),
    /// The host method itself reported an error
    Target(CallError),
    /// The host method panicked; the panic was contained at the boundary
    Panicked(String),
}

impl BridgeError {
    /// Stable status code reported to native callers
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::Registration(_) => -1,
            Self::Marshal(_) => -2,
            Self::InvalidHandle(_) => -3,
            Self::Lifetime(_) => -4,
            Self::Target(_) => -5,
            Self::Panicked(_) => -6,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration(e) => write!(f, "registration error: {}", e),
            Self::Marshal(e) => write!(f, "marshal error: {}", e),
            Self::InvalidHandle(e) => write!(f, "invalid handle: {}", e),
            Self::Lifetime(e) => write!(f, "lifetime error: {}", e),
            Self::Target(e) => write!(f, "method failed: {}", e),
            Self::Panicked(msg) => write!(f, "method panicked: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Registration(e) => Some(e),
            Self::Marshal(e) => Some(e),
            Self::InvalidHandle(e) => Some(e),
            Self::Lifetime(e) => Some(e),
            Self::Target(e) => Some(e),
            Self::Panicked(_) => None,
        }
    }
}

impl From<RegistrationError> for BridgeError {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

impl From<MarshalError> for BridgeError {
    fn from(e: MarshalError) -> Self {
        Self::Marshal(e)
    }
}

impl From<InvalidHandleError> for BridgeError {
    fn from(e: InvalidHandleError) -> Self {
        Self::InvalidHandle(e)
    }
}

impl From<LifetimeError> for BridgeError {
    fn from(e: LifetimeError) -> Self {
        Self::Lifetime(e)
    }
}

impl From<CallError> for BridgeError {
    fn from(e: CallError) -> Self {
        Self::Target(e)
    }
}

pub type Result<T, E = BridgeError> = core::result::Result<T, E>;
