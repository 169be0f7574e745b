//! Interoperability - values, argument cells and the C ABI
//!
//! Architecture:
//! - `types.rs` - type tags and decoded values
//! - `marshal.rs` - argument cells to typed values (length-checked cursor)
//! - `call.rs` - host callables and their decoded arguments
//! - `abi.rs` - C result/metadata shapes and the invoke callback type
//! - `library.rs` - dynamic module loading (dlopen/LoadLibrary)

mod abi;
mod call;
mod library;
mod marshal;
mod types;

pub use abi::{free_raw_value, InvokeMethodFn, RawMethodMetadata, RawValue, STATUS_INVALID_ARGUMENT, STATUS_OK};
pub use call::{CallArgs, CallError, HostObject, NativeCallable};
pub use library::{Library, LoadError, ModuleEntryFn, SymbolError, MODULE_ENTRY_SYMBOL};
pub use marshal::{ArgBuffer, ArgCursor, ArgPacker, CellKind};
pub use types::{blittable_bytes, BlittableValue, Cell, StructLayout, StructValue, TypeTag, Value};

pub(crate) use marshal::unpack_call;
