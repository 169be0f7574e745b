//! Type and method descriptors produced by module export

use core::any::TypeId;
use core::fmt;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::error::RegistrationError;
use crate::handles::{MethodHandle, TypeHash};
use crate::interop::{NativeCallable, StructLayout, TypeTag};

/// What kind of type a descriptor names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference type living in the object cache
    Class,
    /// Value type copied byte-for-byte
    Struct(StructLayout),
}

/// One bindable type
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub hash: TypeHash,
    pub name: String,
    pub kind: TypeKind,
    /// Rust type backing a class, used to find the class of cached objects
    pub rust_type: Option<TypeId>,
}

impl TypeDescriptor {
    pub fn class(name: &str, rust_type: Option<TypeId>) -> Self {
        Self {
            hash: TypeHash::from_name(name),
            name: name.to_owned(),
            kind: TypeKind::Class,
            rust_type,
        }
    }

    pub fn value_type(name: &str, size: usize, align: usize) -> Self {
        let hash = TypeHash::from_name(name);
        Self {
            hash,
            name: name.to_owned(),
            kind: TypeKind::Struct(StructLayout::new(hash, size, align)),
            rust_type: None,
        }
    }

    pub fn layout(&self) -> Option<StructLayout> {
        match self.kind {
            TypeKind::Struct(layout) => Some(layout),
            TypeKind::Class => None,
        }
    }

    /// Check the descriptor against the registry limits
    pub fn validate(&self, limits: &RegistryConfig) -> Result<(), RegistrationError> {
        let invalid = |reason: String| RegistrationError::InvalidType {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("empty type name".into()));
        }
        if let TypeKind::Struct(layout) = self.kind {
            if layout.size > limits.max_struct_size {
                return Err(invalid(format!(
                    "size {} exceeds the {} byte limit",
                    layout.size, limits.max_struct_size
                )));
            }
            if !layout.align.is_power_of_two() {
                return Err(invalid(format!("alignment {} is not a power of two", layout.align)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Static,
    /// Takes a leading receiver cell
    Instance,
}

impl MethodKind {
    #[inline]
    pub const fn is_instance(self) -> bool {
        matches!(self, Self::Instance)
    }
}

/// Parameter and return tags of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: SmallVec<[TypeTag; 4]>,
    pub ret: TypeTag,
    pub kind: MethodKind,
    /// Hash of owner, name and tags; unique within a type
    pub hash: TypeHash,
}

impl MethodSignature {
    pub fn new(owner: TypeHash, name: &str, params: &[TypeTag], ret: TypeTag, kind: MethodKind) -> Self {
        Self {
            params: SmallVec::from_slice(params),
            ret,
            kind,
            hash: TypeHash::from_method(owner, name, params, ret, !kind.is_instance()),
        }
    }

    /// Cells an invocation carries, receiver included
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.params.len() + self.kind.is_instance() as usize
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, tag) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", tag)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Declared method awaiting registration
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub signature: MethodSignature,
    pub callable: Arc<dyn NativeCallable>,
}

impl MethodDescriptor {
    /// `[static ]name(tags) -> ret` for diagnostics
    pub fn display_name(&self) -> String {
        let prefix = if self.signature.kind.is_instance() { "" } else { "static " };
        format!("{}{}{}", prefix, self.name, self.signature)
    }

    pub fn validate(&self, limits: &RegistryConfig) -> Result<(), RegistrationError> {
        let params = &self.signature.params;
        if params.len() > limits.max_parameters {
            return Err(RegistrationError::TooManyParameters {
                method: self.name.clone(),
                count: params.len(),
                max: limits.max_parameters,
            });
        }

        for (index, tag) in params.iter().copied().enumerate() {
            let reason = match tag {
                TypeTag::Void => Some("void is not a parameter type"),
                TypeTag::Struct(layout) if layout.size > limits.max_struct_size => {
                    Some("value type exceeds the size limit")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(RegistrationError::UnsupportedParameter {
                    method: self.name.clone(),
                    index,
                    tag,
                    reason,
                });
            }
        }

        if let TypeTag::Struct(layout) = self.signature.ret {
            if layout.size > limits.max_struct_size {
                return Err(RegistrationError::UnsupportedReturn {
                    method: self.name.clone(),
                    tag: self.signature.ret,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Method accepted by the native side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredMethod {
    pub handle: MethodHandle,
    pub name: String,
    pub signature: MethodSignature,
}

/// A type together with the methods it declares
#[derive(Debug, Clone)]
pub struct TypeDeclaration {
    pub descriptor: TypeDescriptor,
    pub methods: Vec<MethodDescriptor>,
}
