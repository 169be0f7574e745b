//! The bridge object
//!
//! One [`Bridge`] owns the type registry, the method table and the object
//! cache for one native runtime. Native code reaches it through the invoke
//! callback installed per class holder context, whose `user_data` is the
//! bridge's address. Dropping the bridge withdraws those callbacks.

use core::any::{type_name, Any, TypeId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::{ManagedHandle, ObjectCache, OwnedManagedHandle, RefKind, ResolvedObject};
use crate::config::BridgeConfig;
use crate::delegate::DelegateBinding;
use crate::error::{BridgeError, InvalidHandleError, MarshalError, RegistrationError};
use crate::handles::{ClassHandle, ClassHolderContext, DelegateHandle, MethodHandle, ModuleId, ReferenceToken, TypeHash};
use crate::interop::{unpack_call, ArgBuffer, Library, Value, MODULE_ENTRY_SYMBOL};
use crate::logging::{
    debug, log_invoke, log_module_loaded, log_module_unloaded, log_registration_skipped, perf,
};
use crate::registry::{
    MethodEntry, MethodOwner, MethodTable, ModuleBuilder, ModuleSource, RegisteredMethod, RegisteredType,
    RegistrySnapshot, TypeDeclaration, TypeRegistry,
};
use crate::runtime::NativeRuntime;
use crate::stats::{BridgeStats, Counters};

/// Outcome of one module registration
#[derive(Debug)]
pub struct RegistrationReport {
    pub module: ModuleId,
    pub types: Vec<Arc<RegisteredType>>,
    /// Types and methods left out, in the order they were declared
    pub skipped: Vec<RegistrationError>,
}

impl RegistrationReport {
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|t| t.methods.len()).sum()
    }
}

struct LoadedModule {
    name: String,
    ctx: ClassHolderContext,
    // Unmapped once the last method entry referencing it is gone
    _library: Option<Arc<Library>>,
}

pub struct Bridge {
    runtime: Arc<dyn NativeRuntime>,
    config: BridgeConfig,
    types: TypeRegistry,
    methods: MethodTable,
    cache: ObjectCache,
    modules: Mutex<HashMap<ModuleId, LoadedModule>>,
    installed: Mutex<HashSet<ClassHolderContext>>,
    next_module: AtomicU64,
    counters: Counters,
}

impl Bridge {
    pub fn new(runtime: Arc<dyn NativeRuntime>, config: BridgeConfig) -> Arc<Self> {
        let cache = ObjectCache::with_capacity(config.cache.initial_capacity);
        Arc::new(Self {
            runtime,
            config,
            types: TypeRegistry::new(),
            methods: MethodTable::new(),
            cache,
            modules: Mutex::new(HashMap::new()),
            installed: Mutex::new(HashSet::new()),
            next_module: AtomicU64::new(1),
            counters: Counters::default(),
        })
    }

    pub fn with_defaults(runtime: Arc<dyn NativeRuntime>) -> Arc<Self> {
        Self::new(runtime, BridgeConfig::default())
    }

    pub fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register every type a module exports.
    ///
    /// A module that cannot be loaded fails the whole call. Types and
    /// methods that cannot be described are logged, listed in the report
    /// and skipped.
    pub fn register_assembly(
        self: &Arc<Self>,
        ctx: ClassHolderContext,
        source: &ModuleSource,
    ) -> Result<RegistrationReport, RegistrationError> {
        let _perf = perf::track("register_assembly");
        let name = source.display_name();

        let (declarations, library) = match source {
            ModuleSource::Static(module) => {
                let mut builder = ModuleBuilder::new();
                module.export(&mut builder);
                (builder.into_declarations(), None)
            }
            ModuleSource::Path(path) => {
                let library = Library::open(path).map_err(|e| RegistrationError::ModuleLoad {
                    path: name.clone(),
                    reason: e.to_string(),
                })?;
                let entry = library.entry_point().map_err(|_| RegistrationError::EntryPointMissing {
                    path: name.clone(),
                    symbol: MODULE_ENTRY_SYMBOL,
                })?;
                let mut builder = ModuleBuilder::new();
                // SAFETY: the module exports its entry with the ModuleEntryFn signature
                unsafe { entry(&mut builder) };
                (builder.into_declarations(), Some(Arc::new(library)))
            }
        };

        self.install_invoker(ctx);

        let module = ModuleId(self.next_module.fetch_add(1, Ordering::Relaxed));
        let mut report = RegistrationReport {
            module,
            types: Vec::with_capacity(declarations.len()),
            skipped: Vec::new(),
        };

        for declaration in declarations {
            let type_name = declaration.descriptor.name.clone();
            match self.register_type(ctx, module, library.as_ref(), declaration) {
                Ok((ty, skipped)) => {
                    report.types.push(ty);
                    report.skipped.extend(skipped);
                }
                Err(e) => {
                    log_registration_skipped(&type_name, &e);
                    report.skipped.push(e);
                }
            }
        }

        self.modules.lock().insert(
            module,
            LoadedModule {
                name: name.clone(),
                ctx,
                _library: library,
            },
        );
        Counters::bump(&self.counters.modules_loaded);
        log_module_loaded(module, &name, report.types.len(), report.method_count(), report.skipped.len());
        Ok(report)
    }

    /// Register a module compiled into the host
    pub fn register_module(
        self: &Arc<Self>,
        ctx: ClassHolderContext,
        module: impl crate::registry::BridgeModule + 'static,
    ) -> Result<RegistrationReport, RegistrationError> {
        self.register_assembly(ctx, &ModuleSource::from_module(module))
    }

    /// Install the invoke callback the first time a context is seen
    fn install_invoker(self: &Arc<Self>, ctx: ClassHolderContext) {
        let mut installed = self.installed.lock();
        if installed.insert(ctx) {
            let user_data = Arc::as_ptr(self) as usize;
            self.runtime
                .set_invoke_method_function(ctx, crate::ffi::hyperion_invoke_method, user_data);
            debug!(ctx = %ctx, "invoke callback installed");
        }
    }

    fn register_type(
        &self,
        ctx: ClassHolderContext,
        module: ModuleId,
        library: Option<&Arc<Library>>,
        declaration: TypeDeclaration,
    ) -> Result<(Arc<RegisteredType>, Vec<RegistrationError>), RegistrationError> {
        let TypeDeclaration { descriptor, methods } = declaration;
        let limits = &self.config.registry;

        descriptor.validate(limits)?;
        if !self.types.claim(descriptor.hash) {
            return Err(RegistrationError::DuplicateType { name: descriptor.name });
        }

        let class = self.runtime.register_class(ctx, descriptor.hash, &descriptor.name);
        if class.is_null() {
            self.types.unclaim(descriptor.hash);
            return Err(RegistrationError::NullNativeHandle {
                kind: "class",
                name: descriptor.name,
            });
        }
        debug!(type_name = %descriptor.name, class = %class, hash = %descriptor.hash, "class registered");

        let owner = MethodOwner {
            descriptor: &descriptor,
            class,
            module,
            library,
        };
        let outcome = self.methods.register_methods(self.runtime.as_ref(), &owner, methods, limits);
        let handles: Vec<MethodHandle> = outcome.registered.iter().map(|m| m.handle).collect();

        let ty = RegisteredType {
            descriptor,
            class,
            ctx,
            module,
            methods: outcome.registered,
        };
        let hash = ty.descriptor.hash;
        match self.types.insert(ty) {
            Ok(ty) => Ok((ty, outcome.skipped)),
            Err(e) => {
                self.types.unclaim(hash);
                for handle in handles {
                    self.methods.remove(handle);
                }
                Err(e)
            }
        }
    }

    /// Drop every type and method one module registered, and release the
    /// cached objects of its classes.
    ///
    /// Calls already running keep their method entry until they return.
    pub fn unload_assembly(&self, module: ModuleId) -> Result<(), BridgeError> {
        let loaded = self
            .modules
            .lock()
            .remove(&module)
            .ok_or(InvalidHandleError::UnknownModule(module))?;

        let types = self.types.remove_module(module);
        let methods = self.methods.remove_module(module);
        let classes: HashSet<ClassHandle> = types.iter().map(|t| t.class).collect();
        let objects = self.cache.release_classes(&classes);
        self.cache.sweep();
        Counters::drop_one(&self.counters.modules_loaded);
        debug!(module = %module, name = %loaded.name, ctx = %loaded.ctx, "module removed");
        log_module_unloaded(module, types.len(), methods, objects);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn resolve_type(&self, name: &str) -> Option<Arc<RegisteredType>> {
        self.types.get_by_name(name)
    }

    /// Accepted methods of a type, in declaration order
    pub fn methods_of(&self, hash: TypeHash) -> Option<Vec<RegisteredMethod>> {
        self.types.get(hash).map(|t| t.methods.clone())
    }

    /// First method called `method` on the type called `type_name`
    pub fn find_method(&self, type_name: &str, method: &str) -> Option<MethodHandle> {
        self.resolve_type(type_name)?
            .methods
            .iter()
            .find(|m| m.name == method)
            .map(|m| m.handle)
    }

    pub fn method_entry(&self, handle: MethodHandle) -> Option<Arc<MethodEntry>> {
        self.methods.get(handle)
    }

    // ------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------

    /// Decode `args` per the method's signature, run it and check the result.
    ///
    /// Errors from the target and panics inside it are returned, never
    /// propagated.
    pub fn invoke(&self, method: MethodHandle, args: ArgBuffer<'_>) -> Result<Value, BridgeError> {
        if method.is_null() {
            return Err(InvalidHandleError::NullMethod.into());
        }
        let entry = self
            .methods
            .get(method)
            .ok_or(InvalidHandleError::UnknownMethod(method))?;

        log_invoke(method, &entry.name, args.len());
        Counters::bump(&self.counters.invocations);

        let result = Self::dispatch(&entry, args, &self.cache);
        if let Err(BridgeError::Marshal(_)) = &result {
            Counters::bump(&self.counters.marshal_errors);
        }
        result
    }

    fn dispatch(entry: &MethodEntry, args: ArgBuffer<'_>, cache: &ObjectCache) -> Result<Value, BridgeError> {
        let call_args = unpack_call(&entry.signature, entry.class, args, cache)?;

        let value = panic::catch_unwind(AssertUnwindSafe(|| entry.callable.call(&call_args)))
            .map_err(|payload| BridgeError::Panicked(panic_message(payload.as_ref())))??;

        if !value.matches(entry.signature.ret) {
            return Err(MarshalError::ReturnMismatch {
                expected: entry.signature.ret,
                found: value.tag(),
            }
            .into());
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Object cache
    // ------------------------------------------------------------------

    /// Expose a host object to the native side.
    ///
    /// The object's Rust type must belong to a registered class.
    pub fn add_object_to_cache<T: Any + Send + Sync>(
        &self,
        object: Arc<T>,
        is_weak: bool,
    ) -> Result<(ClassHandle, ReferenceToken), BridgeError> {
        let class = self.class_of::<T>()?;
        let token = self.cache.insert(object, class, RefKind::from_is_weak(is_weak));
        Ok((class, token))
    }

    fn class_of<T: Any>(&self) -> Result<ClassHandle, BridgeError> {
        self.types
            .class_for(TypeId::of::<T>())
            .ok_or_else(|| InvalidHandleError::UnregisteredClass(type_name::<T>()).into())
    }

    pub fn resolve(&self, token: ReferenceToken) -> Result<ResolvedObject, BridgeError> {
        self.cache.resolve(token)
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, token: ReferenceToken) -> Result<Arc<T>, BridgeError> {
        self.cache.resolve_as(token)
    }

    pub fn invalidate(&self, token: ReferenceToken) -> bool {
        self.cache.invalidate(token)
    }

    pub fn release(&self, token: ReferenceToken) -> bool {
        self.cache.release(token)
    }

    /// Free the slots of weak entries whose target is gone
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    // ------------------------------------------------------------------
    // Delegates and handles
    // ------------------------------------------------------------------

    /// Subscribe `target` to a native event delegate
    pub fn bind<T: Any + Send + Sync>(
        self: &Arc<Self>,
        delegate: DelegateHandle,
        target: Arc<T>,
    ) -> Result<DelegateBinding, BridgeError> {
        if delegate.is_null() {
            return Err(InvalidHandleError::NullDelegate.into());
        }
        let class = self.class_of::<T>()?;
        let token = self.cache.insert(Arc::clone(&target), class, RefKind::Weak);
        if let Err(e) = self.cache.resolve(token) {
            self.cache.release(token);
            return Err(e);
        }

        let handler = self.runtime.bind_delegate(delegate, class, token);
        if handler.is_null() {
            self.cache.release(token);
            return Err(InvalidHandleError::NullHandler.into());
        }

        Counters::bump(&self.counters.bound_delegates);
        debug!(delegate = %delegate, handler = %handler, token = %token, "delegate bound");
        Ok(DelegateBinding::new(Arc::clone(self), delegate, class, token, handler, target))
    }

    /// Release a native handle now; no-op for a zeroed handle
    pub fn dispose_handle(&self, handle: &mut ManagedHandle) -> bool {
        handle.dispose(self.runtime.as_ref())
    }

    /// Take ownership of a native handle so it is released on drop
    pub fn own_handle(&self, handle: ManagedHandle) -> OwnedManagedHandle {
        OwnedManagedHandle::new(handle, Arc::clone(&self.runtime))
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.types.snapshot()
    }

    /// Counters and sizes; dead weak cache entries are swept first
    pub fn stats(&self) -> BridgeStats {
        self.cache.sweep();
        BridgeStats {
            types_registered: self.types.len(),
            methods_registered: self.methods.len(),
            invocations: Counters::read(&self.counters.invocations),
            marshal_errors: Counters::read(&self.counters.marshal_errors),
            live_objects: self.cache.len(),
            bound_delegates: Counters::read(&self.counters.bound_delegates),
            modules_loaded: Counters::read(&self.counters.modules_loaded),
        }
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.modules.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let user_data = self as *const Self as usize;
        for ctx in self.installed.get_mut().drain() {
            self.runtime.clear_invoke_method_function(ctx, user_data);
            debug!(ctx = %ctx, "invoke callback withdrawn");
        }
    }
}

impl core::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bridge").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
