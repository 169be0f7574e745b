//! Value handles to native-owned resources

use std::sync::Arc;

use crate::logging::debug;
use crate::runtime::NativeRuntime;

/// `(type, instance)` pair naming a resource owned by the native side.
///
/// The zero value is the null handle. Disposal sends exactly one release
/// message and zeroes the handle so reuse after dispose is detectable.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ManagedHandle {
    pub type_id: u32,
    pub index: u32,
}

impl ManagedHandle {
    pub const NULL: Self = Self { type_id: 0, index: 0 };

    #[inline]
    pub const fn new(type_id: u32, index: u32) -> Self {
        Self { type_id, index }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.type_id != 0 || self.index != 0
    }

    /// Pack into one word: type in the low half, index in the high half
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.type_id as u64 | ((self.index as u64) << 32)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            type_id: bits as u32,
            index: (bits >> 32) as u32,
        }
    }

    /// Release the resource and zero the handle; no-op once zeroed
    pub fn dispose(&mut self, runtime: &dyn NativeRuntime) -> bool {
        if !self.is_valid() {
            return false;
        }
        debug!(type_id = self.type_id, index = self.index, "releasing managed handle");
        runtime.release_managed_handle(*self);
        *self = Self::NULL;
        true
    }
}

/// Scoped owner that releases its handle when dropped
pub struct OwnedManagedHandle {
    handle: ManagedHandle,
    runtime: Arc<dyn NativeRuntime>,
}

impl OwnedManagedHandle {
    pub fn new(handle: ManagedHandle, runtime: Arc<dyn NativeRuntime>) -> Self {
        Self { handle, runtime }
    }

    #[inline]
    pub fn get(&self) -> ManagedHandle {
        self.handle
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        !self.handle.is_valid()
    }

    /// Release now; later calls and the drop are no-ops
    pub fn dispose(&mut self) -> bool {
        self.handle.dispose(self.runtime.as_ref())
    }

    /// Give up ownership without releasing
    pub fn into_inner(mut self) -> ManagedHandle {
        core::mem::take(&mut self.handle)
    }
}

impl Drop for OwnedManagedHandle {
    fn drop(&mut self) {
        self.handle.dispose(self.runtime.as_ref());
    }
}

impl core::fmt::Debug for OwnedManagedHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("OwnedManagedHandle").field(&self.handle).finish()
    }
}
