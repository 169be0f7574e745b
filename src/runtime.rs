//! The native side of the boundary
//!
//! [`NativeRuntime`] is everything the bridge consumes from the foreign
//! runtime. [`CallbackRuntime`] forwards to a C function table supplied by a
//! real engine; [`InProcessRuntime`] is a Rust implementation for embedding
//! and tests that records every call it receives.

use core::ffi::{c_char, c_void};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cache::ManagedHandle;
use crate::error::BridgeError;
use crate::handles::{ClassHandle, ClassHolderContext, DelegateHandle, HandlerToken, MethodHandle, ReferenceToken, TypeHash};
use crate::interop::{free_raw_value, ArgBuffer, InvokeMethodFn, RawMethodMetadata, RawValue, TypeTag, Value};
use crate::logging::{trace, warn};
use crate::registry::MethodSignature;

/// Operations the bridge consumes from the native runtime
pub trait NativeRuntime: Send + Sync {
    /// Register a class; the null handle signals failure
    fn register_class(&self, ctx: ClassHolderContext, type_hash: TypeHash, name: &str) -> ClassHandle;

    /// Register a method of `class`; the null handle signals failure
    fn register_method(&self, class: ClassHandle, name: &str, signature: &MethodSignature) -> MethodHandle;

    /// Install the invoke callback for one class holder context
    fn set_invoke_method_function(&self, ctx: ClassHolderContext, function: InvokeMethodFn, user_data: usize);

    /// Withdraw the callback installed with `user_data`; called when the
    /// bridge behind `user_data` is dropped
    fn clear_invoke_method_function(&self, ctx: ClassHolderContext, user_data: usize);

    /// Subscribe a cached object to a native delegate; null on failure
    fn bind_delegate(&self, delegate: DelegateHandle, class: ClassHandle, token: ReferenceToken) -> HandlerToken;

    /// Drop a subscription synchronously
    fn destroy_handler(&self, handler: HandlerToken);

    fn release_managed_handle(&self, handle: ManagedHandle);
}

/// C function table supplied by a native engine
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeCallbacks {
    pub register_class: unsafe extern "C" fn(ctx: usize, type_hash: u64, name: *const c_char) -> usize,
    pub register_method:
        unsafe extern "C" fn(class: usize, name: *const c_char, metadata: *const RawMethodMetadata) -> usize,
    pub set_invoke_method_function: unsafe extern "C" fn(ctx: usize, function: InvokeMethodFn, user_data: *const c_void),
    pub bind_delegate: unsafe extern "C" fn(delegate: usize, class: usize, token: usize) -> usize,
    pub destroy_handler: unsafe extern "C" fn(handler: usize),
    pub release_managed_handle: unsafe extern "C" fn(handle: ManagedHandle),
}

/// [`NativeRuntime`] backed by a [`NativeCallbacks`] table
pub struct CallbackRuntime {
    callbacks: NativeCallbacks,
}

impl CallbackRuntime {
    /// # Safety
    /// Every function in `callbacks` must be safe to call from any thread
    /// for as long as the runtime is alive.
    pub unsafe fn new(callbacks: NativeCallbacks) -> Self {
        Self { callbacks }
    }
}

impl NativeRuntime for CallbackRuntime {
    fn register_class(&self, ctx: ClassHolderContext, type_hash: TypeHash, name: &str) -> ClassHandle {
        let Ok(cname) = CString::new(name) else {
            warn!(class = name, "class name contains NUL, not registering");
            return ClassHandle::NULL;
        };
        // SAFETY: guaranteed by CallbackRuntime::new
        ClassHandle(unsafe { (self.callbacks.register_class)(ctx.0, type_hash.0, cname.as_ptr()) })
    }

    fn register_method(&self, class: ClassHandle, name: &str, signature: &MethodSignature) -> MethodHandle {
        let Ok(cname) = CString::new(name) else {
            warn!(method = name, "method name contains NUL, not registering");
            return MethodHandle::NULL;
        };
        let tags: Vec<u8> = signature.params.iter().map(|t| t.code()).collect();
        let types: Vec<u64> = signature
            .params
            .iter()
            .map(|t| match t {
                TypeTag::Struct(layout) => layout.type_hash.0,
                _ => 0,
            })
            .collect();
        let metadata = RawMethodMetadata {
            param_count: tags.len() as u32,
            param_tags: tags.as_ptr(),
            param_types: types.as_ptr(),
            return_tag: signature.ret.code(),
            is_static: !signature.kind.is_instance() as u8,
            signature_hash: signature.hash.0,
        };
        // SAFETY: metadata and its arrays outlive the call
        MethodHandle(unsafe { (self.callbacks.register_method)(class.0, cname.as_ptr(), &metadata) })
    }

    fn set_invoke_method_function(&self, ctx: ClassHolderContext, function: InvokeMethodFn, user_data: usize) {
        unsafe { (self.callbacks.set_invoke_method_function)(ctx.0, function, user_data as *const c_void) }
    }

    fn clear_invoke_method_function(&self, ctx: ClassHolderContext, _user_data: usize) {
        // The table has no removal entry. A null user_data makes every later
        // call fail with the null bridge status instead of reaching freed memory.
        unsafe {
            (self.callbacks.set_invoke_method_function)(ctx.0, crate::ffi::hyperion_invoke_method, core::ptr::null())
        }
    }

    fn bind_delegate(&self, delegate: DelegateHandle, class: ClassHandle, token: ReferenceToken) -> HandlerToken {
        HandlerToken(unsafe { (self.callbacks.bind_delegate)(delegate.0, class.0, token.as_raw()) })
    }

    fn destroy_handler(&self, handler: HandlerToken) {
        unsafe { (self.callbacks.destroy_handler)(handler.0) }
    }

    fn release_managed_handle(&self, handle: ManagedHandle) {
        unsafe { (self.callbacks.release_managed_handle)(handle) }
    }
}

/// Class registered with an [`InProcessRuntime`]
#[derive(Debug, Clone)]
pub struct ClassRecord {
    pub ctx: ClassHolderContext,
    pub type_hash: TypeHash,
    pub name: String,
}

/// Method registered with an [`InProcessRuntime`]
#[derive(Debug, Clone)]
pub struct MethodRecord {
    pub class: ClassHandle,
    pub name: String,
    pub signature: MethodSignature,
}

/// Live delegate subscription held by an [`InProcessRuntime`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub delegate: DelegateHandle,
    pub class: ClassHandle,
    pub token: ReferenceToken,
}

#[derive(Clone, Copy)]
struct Invoker {
    function: InvokeMethodFn,
    user_data: usize,
}

/// Native runtime implemented in Rust.
///
/// Hands out handles from a counter, keeps every registration, and calls
/// back into the bridge through the installed invoke function exactly as a
/// native engine would.
pub struct InProcessRuntime {
    next_handle: AtomicUsize,
    classes: DashMap<ClassHandle, ClassRecord>,
    methods: DashMap<MethodHandle, MethodRecord>,
    invokers: Mutex<HashMap<ClassHolderContext, Invoker>>,
    installs: AtomicUsize,
    subscriptions: DashMap<HandlerToken, Subscription>,
    destroyed: Mutex<Vec<HandlerToken>>,
    released: Mutex<Vec<ManagedHandle>>,
    rejected_classes: Mutex<HashSet<String>>,
    rejected_methods: Mutex<HashSet<String>>,
    forced_method_handle: Mutex<Option<MethodHandle>>,
    fail_binds: AtomicBool,
}

impl Default for InProcessRuntime {
    fn default() -> Self {
        Self {
            next_handle: AtomicUsize::new(0x1000),
            classes: DashMap::new(),
            methods: DashMap::new(),
            invokers: Mutex::new(HashMap::new()),
            installs: AtomicUsize::new(0),
            subscriptions: DashMap::new(),
            destroyed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            rejected_classes: Mutex::new(HashSet::new()),
            rejected_methods: Mutex::new(HashSet::new()),
            forced_method_handle: Mutex::new(None),
            fail_binds: AtomicBool::new(false),
        }
    }
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> usize {
        self.next_handle.fetch_add(0x10, Ordering::Relaxed)
    }

    /// Make `register_class` return null for `name`
    pub fn reject_class(&self, name: &str) {
        self.rejected_classes.lock().insert(name.to_owned());
    }

    /// Make `register_method` return null for `name`
    pub fn reject_method(&self, name: &str) {
        self.rejected_methods.lock().insert(name.to_owned());
    }

    /// Make the next `register_method` return `handle`
    pub fn force_next_method_handle(&self, handle: MethodHandle) {
        *self.forced_method_handle.lock() = Some(handle);
    }

    /// Make `bind_delegate` return null while set
    pub fn fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::Relaxed);
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn class(&self, handle: ClassHandle) -> Option<ClassRecord> {
        self.classes.get(&handle).map(|r| r.clone())
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassHandle> {
        self.classes.iter().find(|r| r.name == name).map(|r| *r.key())
    }

    pub fn method(&self, handle: MethodHandle) -> Option<MethodRecord> {
        self.methods.get(&handle).map(|r| r.clone())
    }

    /// First method named `name` registered on `class`
    pub fn method_by_name(&self, class: ClassHandle, name: &str) -> Option<MethodHandle> {
        self.methods
            .iter()
            .find(|r| r.class == class && r.name == name)
            .map(|r| *r.key())
    }

    /// How many times an invoke function was installed
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::Relaxed)
    }

    pub fn has_invoker(&self, ctx: ClassHolderContext) -> bool {
        self.invokers.lock().contains_key(&ctx)
    }

    pub fn subscription(&self, handler: HandlerToken) -> Option<Subscription> {
        self.subscriptions.get(&handler).map(|s| *s)
    }

    /// Live subscriptions of one delegate
    pub fn subscribers(&self, delegate: DelegateHandle) -> Vec<(HandlerToken, Subscription)> {
        self.subscriptions
            .iter()
            .filter(|s| s.delegate == delegate)
            .map(|s| (*s.key(), *s.value()))
            .collect()
    }

    pub fn destroyed_handlers(&self) -> Vec<HandlerToken> {
        self.destroyed.lock().clone()
    }

    pub fn released_handles(&self) -> Vec<ManagedHandle> {
        self.released.lock().clone()
    }

    /// Call a method through the installed invoke function, as native code
    /// would, and read the result back.
    ///
    /// Returns the negative status code on failure. Cells whose recorded
    /// kind does not fit the registered signature are rejected here, before
    /// they cross the C boundary where kinds are lost.
    pub fn invoke(&self, ctx: ClassHolderContext, method: MethodHandle, args: ArgBuffer<'_>) -> Result<Value, i32> {
        let invoker = self.invokers.lock().get(&ctx).copied().ok_or(crate::interop::STATUS_INVALID_ARGUMENT)?;
        let signature = self.methods.get(&method).map(|r| r.signature.clone());
        if let Some(signature) = &signature {
            if let Err(e) = args.check_kinds(signature) {
                warn!(method = %method, error = %e, "argument cells rejected before invoke");
                return Err(BridgeError::from(e).status_code());
            }
        }
        let ret = signature.map_or(TypeTag::Void, |s| s.ret);

        let cells = args.cells();
        let mut out = RawValue::default();
        trace!(method = %method, cells = cells.len(), "native invoke");
        // SAFETY: the invoker was installed by a bridge and the cells come
        // from a well-formed ArgBuffer
        let status = unsafe {
            (invoker.function)(
                invoker.user_data as *const c_void,
                method.0,
                cells.as_ptr(),
                cells.len(),
                &mut out,
            )
        };
        if status != crate::interop::STATUS_OK {
            return Err(status);
        }
        // SAFETY: out was filled by RawValue::from_value
        unsafe {
            let value = out.read(ret);
            free_raw_value(&mut out);
            Ok(value)
        }
    }
}

impl NativeRuntime for InProcessRuntime {
    fn register_class(&self, ctx: ClassHolderContext, type_hash: TypeHash, name: &str) -> ClassHandle {
        if self.rejected_classes.lock().contains(name) {
            return ClassHandle::NULL;
        }
        let handle = ClassHandle(self.next());
        self.classes.insert(
            handle,
            ClassRecord {
                ctx,
                type_hash,
                name: name.to_owned(),
            },
        );
        handle
    }

    fn register_method(&self, class: ClassHandle, name: &str, signature: &MethodSignature) -> MethodHandle {
        if self.rejected_methods.lock().contains(name) {
            return MethodHandle::NULL;
        }
        let handle = self
            .forced_method_handle
            .lock()
            .take()
            .unwrap_or_else(|| MethodHandle(self.next()));
        self.methods.entry(handle).or_insert_with(|| MethodRecord {
            class,
            name: name.to_owned(),
            signature: signature.clone(),
        });
        handle
    }

    fn set_invoke_method_function(&self, ctx: ClassHolderContext, function: InvokeMethodFn, user_data: usize) {
        self.installs.fetch_add(1, Ordering::Relaxed);
        self.invokers.lock().insert(ctx, Invoker { function, user_data });
    }

    fn clear_invoke_method_function(&self, ctx: ClassHolderContext, user_data: usize) {
        let mut invokers = self.invokers.lock();
        if invokers.get(&ctx).is_some_and(|i| i.user_data == user_data) {
            invokers.remove(&ctx);
        }
    }

    fn bind_delegate(&self, delegate: DelegateHandle, class: ClassHandle, token: ReferenceToken) -> HandlerToken {
        if self.fail_binds.load(Ordering::Relaxed) {
            return HandlerToken::NULL;
        }
        let handler = HandlerToken(self.next());
        self.subscriptions.insert(handler, Subscription { delegate, class, token });
        handler
    }

    fn destroy_handler(&self, handler: HandlerToken) {
        self.subscriptions.remove(&handler);
        self.destroyed.lock().push(handler);
    }

    fn release_managed_handle(&self, handle: ManagedHandle) {
        self.released.lock().push(handle);
    }
}
