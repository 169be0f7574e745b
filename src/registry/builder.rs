//! Explicit module export
//!
//! A module lists its bindable types by implementing [`BridgeModule`] and
//! describing each type on a [`ModuleBuilder`]:
//!
//! ```ignore
//! impl BridgeModule for MathModule {
//!     fn name(&self) -> &str { "math" }
//!
//!     fn export(&self, module: &mut ModuleBuilder) {
//!         module
//!             .class::<Calculator>("Math.Calculator")
//!             .static_method("Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |args| {
//!                 Ok(Value::I32(args.i32(0)? + args.i32(1)?))
//!             })
//!             .method("Reset", &[], TypeTag::Void, |args| {
//!                 args.this::<Calculator>()?.reset();
//!                 Ok(Value::Void)
//!             })
//!             .build();
//!     }
//! }
//! ```
//!
//! Shared libraries export a `hyperion_module_export` function that fills in
//! the builder it is handed.

use core::any::{Any, TypeId};
use std::path::PathBuf;
use std::sync::Arc;

use super::descriptor::{MethodDescriptor, MethodKind, MethodSignature, TypeDeclaration, TypeDescriptor};
use crate::handles::TypeHash;
use crate::interop::{BlittableValue, CallArgs, CallError, NativeCallable, StructLayout, TypeTag, Value};

/// A set of types exported to the native runtime
pub trait BridgeModule: Send + Sync {
    fn name(&self) -> &str;

    /// Describe every exported type
    fn export(&self, module: &mut ModuleBuilder);
}

/// [`BridgeModule`] backed by a closure
pub struct FnModule<F> {
    name: String,
    export: F,
}

impl<F> FnModule<F>
where
    F: Fn(&mut ModuleBuilder) + Send + Sync,
{
    pub fn new(name: impl Into<String>, export: F) -> Self {
        Self {
            name: name.into(),
            export,
        }
    }
}

impl<F> BridgeModule for FnModule<F>
where
    F: Fn(&mut ModuleBuilder) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn export(&self, module: &mut ModuleBuilder) {
        (self.export)(module)
    }
}

/// Where a module's types come from
#[derive(Clone)]
pub enum ModuleSource {
    /// Compiled into the host
    Static(Arc<dyn BridgeModule>),
    /// Shared library exporting `hyperion_module_export`
    Path(PathBuf),
}

impl ModuleSource {
    pub fn from_module(module: impl BridgeModule + 'static) -> Self {
        Self::Static(Arc::new(module))
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Static(module) => module.name().to_owned(),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

impl core::fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Static(module) => f.debug_tuple("Static").field(&module.name()).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Collects the type declarations of one module
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    types: Vec<TypeDeclaration>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference type backed by the Rust type `T`
    pub fn class<T: Any + Send + Sync>(&mut self, name: &str) -> TypeBuilder<'_> {
        self.declare(TypeDescriptor::class(name, Some(TypeId::of::<T>())))
    }

    /// Reference type with no Rust counterpart; its objects are never cached
    pub fn opaque_class(&mut self, name: &str) -> TypeBuilder<'_> {
        self.declare(TypeDescriptor::class(name, None))
    }

    /// Value type with the layout of `T`
    pub fn value_type<T: BlittableValue>(&mut self, name: &str) -> TypeBuilder<'_> {
        let layout = StructLayout::of::<T>(name);
        self.declare(TypeDescriptor::value_type(name, layout.size, layout.align))
    }

    /// Value type with an explicit layout
    pub fn struct_type(&mut self, name: &str, size: usize, align: usize) -> TypeBuilder<'_> {
        self.declare(TypeDescriptor::value_type(name, size, align))
    }

    fn declare(&mut self, descriptor: TypeDescriptor) -> TypeBuilder<'_> {
        TypeBuilder {
            module: self,
            declaration: TypeDeclaration {
                descriptor,
                methods: Vec::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn declarations(&self) -> &[TypeDeclaration] {
        &self.types
    }

    pub fn into_declarations(self) -> Vec<TypeDeclaration> {
        self.types
    }
}

/// Fluent builder for one type; [`TypeBuilder::build`] adds it to the module
#[must_use = "call build() to add the type to the module"]
pub struct TypeBuilder<'m> {
    module: &'m mut ModuleBuilder,
    declaration: TypeDeclaration,
}

impl<'m> TypeBuilder<'m> {
    pub fn hash(&self) -> TypeHash {
        self.declaration.descriptor.hash
    }

    /// Layout of a value type, for use as a parameter or return tag
    pub fn layout(&self) -> Option<StructLayout> {
        self.declaration.descriptor.layout()
    }

    /// Instance method; the receiver is available through [`CallArgs::this`]
    pub fn method<F>(self, name: &str, params: &[TypeTag], ret: TypeTag, f: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.method_with(name, MethodKind::Instance, params, ret, Arc::new(f))
    }

    pub fn static_method<F>(self, name: &str, params: &[TypeTag], ret: TypeTag, f: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.method_with(name, MethodKind::Static, params, ret, Arc::new(f))
    }

    pub fn method_with(
        mut self,
        name: &str,
        kind: MethodKind,
        params: &[TypeTag],
        ret: TypeTag,
        callable: Arc<dyn NativeCallable>,
    ) -> Self {
        let signature = MethodSignature::new(self.hash(), name, params, ret, kind);
        self.declaration.methods.push(MethodDescriptor {
            name: name.to_owned(),
            signature,
            callable,
        });
        self
    }

    pub fn build(self) {
        self.module.types.push(self.declaration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_types_in_order() {
        let mut module = ModuleBuilder::new();
        module
            .opaque_class("A")
            .static_method("One", &[], TypeTag::I32, |_| Ok(Value::I32(1)))
            .build();
        module.struct_type("B", 8, 4).build();

        let types = module.into_declarations();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].descriptor.name, "A");
        assert_eq!(types[0].methods.len(), 1);
        assert_eq!(types[1].descriptor.layout().map(|l| l.size), Some(8));
    }

    #[test]
    fn test_signature_hash_distinguishes_overloads() {
        let mut module = ModuleBuilder::new();
        module
            .opaque_class("Math")
            .static_method("Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, |_| Ok(Value::Void))
            .static_method("Add", &[TypeTag::F64, TypeTag::F64], TypeTag::F64, |_| Ok(Value::Void))
            .build();

        let types = module.into_declarations();
        let methods = &types[0].methods;
        assert_ne!(methods[0].signature.hash, methods[1].signature.hash);
        assert_eq!(methods[0].display_name(), "static Add(i32, i32) -> i32");
    }

    #[test]
    fn test_unbuilt_type_is_dropped() {
        let mut module = ModuleBuilder::new();
        let _ = module.opaque_class("Forgotten");
        assert!(module.is_empty());
    }
}
