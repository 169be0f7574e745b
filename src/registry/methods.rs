//! Method table
//!
//! Maps native method handles to the callables they invoke. Entries are
//! `Arc`s so an invocation can clone one out of the map and drop the shard
//! lock before the target runs.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::descriptor::{MethodDescriptor, MethodSignature, RegisteredMethod, TypeDescriptor};
use crate::config::RegistryConfig;
use crate::error::RegistrationError;
use crate::handles::{ClassHandle, MethodHandle, ModuleId, TypeHash};
use crate::interop::{Library, NativeCallable};
use crate::logging::{debug, log_registration_skipped};
use crate::runtime::NativeRuntime;

/// Everything an invocation needs about one method
pub struct MethodEntry {
    pub handle: MethodHandle,
    pub class: ClassHandle,
    pub owner: TypeHash,
    pub module: ModuleId,
    pub name: String,
    pub signature: MethodSignature,
    pub callable: Arc<dyn NativeCallable>,
    // Code of a dynamically loaded module stays mapped while the entry lives
    _library: Option<Arc<Library>>,
}

impl core::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("handle", &self.handle)
            .field("class", &self.class)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Type whose methods are being registered
pub struct MethodOwner<'a> {
    pub descriptor: &'a TypeDescriptor,
    pub class: ClassHandle,
    pub module: ModuleId,
    pub library: Option<&'a Arc<Library>>,
}

/// Outcome of registering one type's methods
#[derive(Debug, Default)]
pub struct MethodRegistration {
    pub registered: Vec<RegisteredMethod>,
    pub skipped: Vec<RegistrationError>,
}

#[derive(Default)]
pub struct MethodTable {
    entries: DashMap<MethodHandle, Arc<MethodEntry>>,
    by_signature: DashMap<TypeHash, MethodHandle>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone out the entry for `handle`
    #[inline]
    pub fn get(&self, handle: MethodHandle) -> Option<Arc<MethodEntry>> {
        self.entries.get(&handle).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, handle: MethodHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Register every declared method of one type with the native side.
    ///
    /// Methods that fail validation or native registration are logged and
    /// skipped; the rest are recorded in declaration order.
    pub fn register_methods(
        &self,
        runtime: &dyn NativeRuntime,
        owner: &MethodOwner<'_>,
        methods: Vec<MethodDescriptor>,
        limits: &RegistryConfig,
    ) -> MethodRegistration {
        let mut outcome = MethodRegistration::default();
        for method in methods {
            match self.register_one(runtime, owner, method, limits) {
                Ok(registered) => outcome.registered.push(registered),
                Err(e) => {
                    log_registration_skipped(&owner.descriptor.name, &e);
                    outcome.skipped.push(e);
                }
            }
        }
        outcome
    }

    fn register_one(
        &self,
        runtime: &dyn NativeRuntime,
        owner: &MethodOwner<'_>,
        method: MethodDescriptor,
        limits: &RegistryConfig,
    ) -> Result<RegisteredMethod, RegistrationError> {
        method.validate(limits)?;

        let duplicate = || RegistrationError::DuplicateMethod {
            type_name: owner.descriptor.name.clone(),
            signature: method.display_name(),
        };
        if self.by_signature.contains_key(&method.signature.hash) {
            return Err(duplicate());
        }

        let handle = runtime.register_method(owner.class, &method.name, &method.signature);
        if handle.is_null() {
            return Err(RegistrationError::NullNativeHandle {
                kind: "method",
                name: method.display_name(),
            });
        }

        let entry = Arc::new(MethodEntry {
            handle,
            class: owner.class,
            owner: owner.descriptor.hash,
            module: owner.module,
            name: method.name.clone(),
            signature: method.signature.clone(),
            callable: method.callable.clone(),
            _library: owner.library.cloned(),
        });

        match self.entries.entry(handle) {
            Entry::Occupied(_) => {
                return Err(RegistrationError::DuplicateNativeHandle {
                    name: method.display_name(),
                    handle: handle.as_raw(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        match self.by_signature.entry(method.signature.hash) {
            Entry::Occupied(_) => {
                self.entries.remove(&handle);
                return Err(duplicate());
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        debug!(
            type_name = %owner.descriptor.name,
            method = %method.display_name(),
            handle = %handle,
            "method registered"
        );
        Ok(RegisteredMethod {
            handle,
            name: method.name,
            signature: method.signature,
        })
    }

    pub fn remove(&self, handle: MethodHandle) -> Option<Arc<MethodEntry>> {
        let (_, entry) = self.entries.remove(&handle)?;
        self.by_signature.remove_if(&entry.signature.hash, |_, h| *h == handle);
        Some(entry)
    }

    /// Drop every method registered by `module`; returns how many were removed
    pub fn remove_module(&self, module: ModuleId) -> usize {
        let removed: Vec<MethodHandle> = self
            .entries
            .iter()
            .filter(|e| e.module == module)
            .map(|e| *e.key())
            .collect();
        removed.iter().filter(|h| self.remove(**h).is_some()).count()
    }
}
