//! Type registry and method table
//!
//! Architecture:
//! - `descriptor.rs` - type/method descriptors and their validation
//! - `builder.rs` - explicit module export (`BridgeModule`, `ModuleBuilder`)
//! - `methods.rs` - native method handle -> callable table
//!
//! Registered types are indexed three ways: by type hash, by native class
//! handle, and by Rust `TypeId` so cached objects find their class.

mod builder;
mod descriptor;
mod methods;


pub use builder::{BridgeModule, FnModule, ModuleBuilder, ModuleSource, TypeBuilder};
pub use descriptor::{
    MethodDescriptor, MethodKind, MethodSignature, RegisteredMethod, TypeDeclaration, TypeDescriptor, TypeKind,
};
pub use methods::{MethodEntry, MethodOwner, MethodRegistration, MethodTable};

use core::any::TypeId;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::sync::Arc;

use crate::error::RegistrationError;
use crate::handles::{ClassHandle, ClassHolderContext, ModuleId, TypeHash};

/// Type accepted by the native side
#[derive(Debug)]
pub struct RegisteredType {
    pub descriptor: TypeDescriptor,
    pub class: ClassHandle,
    pub ctx: ClassHolderContext,
    pub module: ModuleId,
    /// Accepted methods in declaration order
    pub methods: Vec<RegisteredMethod>,
}

#[derive(Default)]
pub struct TypeRegistry {
    types: DashMap<TypeHash, Arc<RegisteredType>>,
    by_class: DashMap<ClassHandle, TypeHash>,
    by_rust_type: DashMap<TypeId, TypeHash>,
    // Hashes taken by a registered type or one whose registration is running
    claimed: DashSet<TypeHash>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, hash: TypeHash) -> bool {
        self.types.contains_key(&hash)
    }

    pub fn get(&self, hash: TypeHash) -> Option<Arc<RegisteredType>> {
        self.types.get(&hash).map(|t| Arc::clone(t.value()))
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<RegisteredType>> {
        self.get(TypeHash::from_name(name))
    }

    pub fn get_by_class(&self, class: ClassHandle) -> Option<Arc<RegisteredType>> {
        let hash = *self.by_class.get(&class)?;
        self.get(hash)
    }

    /// Class registered for the Rust type `type_id`
    pub fn class_for(&self, type_id: TypeId) -> Option<ClassHandle> {
        let hash = *self.by_rust_type.get(&type_id)?;
        self.get(hash).map(|t| t.class)
    }

    /// Reserve `hash` for a registration about to start.
    ///
    /// Returns `false` if the type is registered or another registration
    /// holds the claim.
    pub fn claim(&self, hash: TypeHash) -> bool {
        self.claimed.insert(hash)
    }

    /// Give up a claim whose registration failed
    pub fn unclaim(&self, hash: TypeHash) {
        if !self.types.contains_key(&hash) {
            self.claimed.remove(&hash);
        }
    }

    /// Record a type; one entry per type hash
    pub fn insert(&self, ty: RegisteredType) -> Result<Arc<RegisteredType>, RegistrationError> {
        let ty = Arc::new(ty);
        match self.types.entry(ty.descriptor.hash) {
            Entry::Occupied(_) => {
                return Err(RegistrationError::DuplicateType {
                    name: ty.descriptor.name.clone(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&ty));
            }
        }
        self.claimed.insert(ty.descriptor.hash);
        self.by_class.insert(ty.class, ty.descriptor.hash);
        if let Some(type_id) = ty.descriptor.rust_type {
            self.by_rust_type.insert(type_id, ty.descriptor.hash);
        }
        Ok(ty)
    }

    /// Remove every type registered by `module`
    pub fn remove_module(&self, module: ModuleId) -> Vec<Arc<RegisteredType>> {
        let hashes: Vec<TypeHash> = self
            .types
            .iter()
            .filter(|t| t.module == module)
            .map(|t| *t.key())
            .collect();

        let mut removed = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some((_, ty)) = self.types.remove(&hash) {
                self.by_class.remove(&ty.class);
                self.claimed.remove(&hash);
                if let Some(type_id) = ty.descriptor.rust_type {
                    self.by_rust_type.remove_if(&type_id, |_, h| *h == hash);
                }
                removed.push(ty);
            }
        }
        removed
    }

    /// Every registered type, ordered by name
    pub fn types(&self) -> Vec<Arc<RegisteredType>> {
        let mut types: Vec<_> = self.types.iter().map(|t| Arc::clone(t.value())).collect();
        types.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        types
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            types: self.types().iter().map(|t| TypeSnapshot::of(t)).collect(),
        }
    }
}

/// Serializable view of the registry for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub types: Vec<TypeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeSnapshot {
    pub name: String,
    pub hash: TypeHash,
    pub class: usize,
    pub module: u64,
    /// Size in bytes for value types
    pub size: Option<usize>,
    pub methods: Vec<MethodSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodSnapshot {
    pub name: String,
    pub handle: usize,
    pub signature: String,
    pub is_static: bool,
}

impl TypeSnapshot {
    fn of(ty: &RegisteredType) -> Self {
        Self {
            name: ty.descriptor.name.clone(),
            hash: ty.descriptor.hash,
            class: ty.class.as_raw(),
            module: ty.module.0,
            size: ty.descriptor.layout().map(|l| l.size),
            methods: ty
                .methods
                .iter()
                .map(|m| MethodSnapshot {
                    name: m.name.clone(),
                    handle: m.handle.as_raw(),
                    signature: m.signature.to_string(),
                    is_static: !m.signature.kind.is_instance(),
                })
                .collect(),
        }
    }
}

impl RegistrySnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn method_count(&self) -> usize {
        self.types.iter().map(|t| t.methods.len()).sum()
    }
}
