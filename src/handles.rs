//! Opaque identifiers exchanged across the native boundary
//!
//! Every handle is an address-sized token. Zero is the null handle on both
//! sides of the boundary and is never issued for a live resource.

use core::fmt;

use crate::interop::TypeTag;

/// Defines an address-sized opaque handle newtype.
macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn from_raw(raw: usize) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn as_raw(self) -> usize {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

opaque_handle! {
    /// Native-side context that owns class registrations for one module
    ClassHolderContext
}

opaque_handle! {
    /// Native class handle returned by `register_class`
    ClassHandle
}

opaque_handle! {
    /// Native method handle returned by `register_method`
    MethodHandle
}

opaque_handle! {
    /// Native event delegate a host target can be bound to
    DelegateHandle
}

opaque_handle! {
    /// Native subscription token returned by `bind_delegate`
    HandlerToken
}

/// Token identifying one object cache slot.
///
/// The low half of the word is the slot index, the high half the slot
/// generation. Generations start at 1 so a live token is never null. On
/// 32-bit targets each half is 16 bits wide, which caps the cache at
/// [`ReferenceToken::MAX_INDEX`] + 1 slots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ReferenceToken(pub usize);

impl ReferenceToken {
    pub const NULL: Self = Self(0);

    const HALF: u32 = usize::BITS / 2;
    const LOW_MASK: usize = usize::MAX >> (usize::BITS / 2);

    /// Largest slot index a token can carry
    pub const MAX_INDEX: u32 = Self::LOW_MASK as u32;
    /// Largest generation a token can carry; the cache wraps back to 1
    pub const MAX_GENERATION: u32 = Self::LOW_MASK as u32;

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        debug_assert!(index <= Self::MAX_INDEX);
        debug_assert!(generation <= Self::MAX_GENERATION);
        let index = index as usize & Self::LOW_MASK;
        let generation = generation as usize & Self::LOW_MASK;
        Self(index | (generation << Self::HALF))
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn index(self) -> u32 {
        (self.0 & Self::LOW_MASK) as u32
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> Self::HALF) as u32
    }
}

impl fmt::Debug for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceToken({}@{})", self.index(), self.generation())
    }
}

impl fmt::Display for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index(), self.generation())
    }
}

/// Identifies one loaded module inside a bridge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Stable 64-bit identifier of a bindable type or method signature.
///
/// Derived from a BLAKE3 digest of the qualified name, so the same name maps
/// to the same identifier in every registration call and every process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Hash a qualified type name
    pub fn from_name(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"type:");
        hasher.update(name.as_bytes());
        Self::from_digest(hasher.finalize())
    }

    /// Hash a method's owner, name and full signature
    pub fn from_method(owner: TypeHash, name: &str, params: &[TypeTag], ret: TypeTag, is_static: bool) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"method:");
        hasher.update(&owner.0.to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&[0, is_static as u8]);
        for tag in params.iter().chain(core::iter::once(&ret)) {
            hasher.update(&[tag.code()]);
            if let TypeTag::Struct(layout) = tag {
                hasher.update(&layout.type_hash.0.to_le_bytes());
            }
        }
        Self::from_digest(hasher.finalize())
    }

    fn from_digest(digest: blake3::Hash) -> Self {
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        // Zero is reserved for EMPTY
        match u64::from_le_bytes(word) {
            0 => Self(1),
            value => Self(value),
        }
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_hash_is_stable() {
        assert_eq!(TypeHash::from_name("Scene"), TypeHash::from_name("Scene"));
        assert_ne!(TypeHash::from_name("Scene"), TypeHash::from_name("Node"));
        assert!(!TypeHash::from_name("").is_empty());
    }

    #[test]
    fn test_method_hash_depends_on_signature() {
        let owner = TypeHash::from_name("Math");
        let a = TypeHash::from_method(owner, "Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, true);
        let b = TypeHash::from_method(owner, "Add", &[TypeTag::F64, TypeTag::F64], TypeTag::F64, true);
        let c = TypeHash::from_method(owner, "Add", &[TypeTag::I32, TypeTag::I32], TypeTag::I32, false);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reference_token_packing() {
        let token = ReferenceToken::new(7, 3);
        assert_eq!(token.index(), 7);
        assert_eq!(token.generation(), 3);
        assert!(!token.is_null());
        assert!(ReferenceToken::new(0, 0).is_null());
    }

    #[test]
    fn test_null_handles() {
        assert!(MethodHandle::NULL.is_null());
        assert!(!ClassHandle::from_raw(0x10).is_null());
        assert_eq!(format!("{:?}", HandlerToken(0x20)), "HandlerToken(0x20)");
    }
}
