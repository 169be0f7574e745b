//! Hyperion Interop - object and method bridge to a native runtime
//!
//! Exposes host objects and methods to a foreign native engine over a C
//! ABI:
//! - `registry` - type registry, method table and explicit module export
//! - `interop` - argument cells, typed values and the C result shapes
//! - `cache` - cross-boundary object cache and native handles
//! - `delegate` - native event delegates bound to host targets
//! - `bridge` - the object tying them together for one native runtime
//! - `ffi` - `extern "C"` entry points
//!
//! ```ignore
//! let runtime = Arc::new(InProcessRuntime::new());
//! let bridge = Bridge::with_defaults(runtime.clone());
//! bridge.register_module(ctx, FnModule::new("math", |module| {
//!     module
//!         .opaque_class("Math")
//!         .static_method("Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |args| {
//!             Ok(Value::I32(args.i32(0)? + args.i32(1)?))
//!         })
//!         .build();
//! }))?;
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod delegate;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod interop;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod stats;

pub use bridge::{Bridge, RegistrationReport};
pub use cache::{ManagedHandle, ObjectCache, OwnedManagedHandle, RefKind, ResolvedObject};
pub use config::{BridgeConfig, ConfigError};
pub use delegate::DelegateBinding;
pub use error::{BridgeError, InvalidHandleError, LifetimeError, MarshalError, RegistrationError};
pub use handles::{ClassHandle, ClassHolderContext, DelegateHandle, HandlerToken, MethodHandle, ModuleId, ReferenceToken, TypeHash};
pub use interop::{ArgBuffer, ArgPacker, CallArgs, CallError, StructLayout, StructValue, TypeTag, Value};
pub use registry::{BridgeModule, FnModule, MethodKind, ModuleBuilder, ModuleSource, RegistrySnapshot};
pub use runtime::{CallbackRuntime, InProcessRuntime, NativeCallbacks, NativeRuntime};
pub use stats::BridgeStats;
