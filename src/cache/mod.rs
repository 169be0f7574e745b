//! Cross-boundary object cache
//!
//! Host objects handed to the native side live in generational slots. Each
//! slot entry is either strong (the cache keeps the object alive) or weak
//! (some other owner does, usually a delegate binding). Every resolve checks
//! the slot generation, the entry's explicit `valid` flag and, for weak
//! entries, that the target is still alive.
//!
//! Weak entries whose target died are reclaimed by [`ObjectCache::sweep`],
//! which also runs before the slot table grows.

mod handle;


pub use handle::{ManagedHandle, OwnedManagedHandle};

use core::any::{type_name, Any};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{BridgeError, InvalidHandleError, LifetimeError};
use crate::handles::{ClassHandle, ReferenceToken};
use crate::interop::HostObject;
use crate::logging::{debug, trace};

/// How the cache holds an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Strong,
    Weak,
}

impl RefKind {
    #[inline]
    pub const fn from_is_weak(is_weak: bool) -> Self {
        if is_weak {
            Self::Weak
        } else {
            Self::Strong
        }
    }
}

enum Target {
    Strong(HostObject),
    Weak(Weak<dyn Any + Send + Sync>),
}

struct Entry {
    class: ClassHandle,
    type_name: &'static str,
    target: Target,
    valid: bool,
}

impl Entry {
    fn is_dead(&self) -> bool {
        matches!(&self.target, Target::Weak(weak) if weak.strong_count() == 0)
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

impl Slot {
    /// Empty the slot and move its generation on, skipping zero
    fn vacate(&mut self) -> Option<Entry> {
        let entry = self.entry.take()?;
        self.generation = if self.generation >= ReferenceToken::MAX_GENERATION {
            1
        } else {
            self.generation + 1
        };
        Some(entry)
    }
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Object resolved from a live token
#[derive(Clone)]
pub struct ResolvedObject {
    pub token: ReferenceToken,
    pub class: ClassHandle,
    pub kind: RefKind,
    pub object: HostObject,
}

impl core::fmt::Debug for ResolvedObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResolvedObject")
            .field("token", &self.token)
            .field("class", &self.class)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Generational cache of host objects exposed to the native side
pub struct ObjectCache {
    inner: RwLock<Slots>,
    live: AtomicUsize,
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Slots {
                slots: Vec::with_capacity(capacity),
                free: Vec::new(),
            }),
            live: AtomicUsize::new(0),
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a typed object and return its token
    pub fn insert<T: Any + Send + Sync>(&self, object: Arc<T>, class: ClassHandle, kind: RefKind) -> ReferenceToken {
        self.insert_erased(object, class, kind, type_name::<T>())
    }

    /// Store a type-erased object and return its token
    pub fn insert_erased(
        &self,
        object: HostObject,
        class: ClassHandle,
        kind: RefKind,
        type_name: &'static str,
    ) -> ReferenceToken {
        let target = match kind {
            RefKind::Strong => Target::Strong(object),
            RefKind::Weak => Target::Weak(Arc::downgrade(&object)),
        };
        let entry = Entry {
            class,
            type_name,
            target,
            valid: true,
        };

        let mut inner = self.inner.write();
        let reclaimed = if inner.free.is_empty() && inner.slots.len() == inner.slots.capacity() {
            Self::sweep_locked(&mut inner)
        } else {
            Vec::new()
        };
        let token = match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.entry = Some(entry);
                ReferenceToken::new(index, slot.generation)
            }
            None => {
                let index = inner.slots.len() as u32;
                debug_assert!(index <= ReferenceToken::MAX_INDEX, "object cache exhausted token indices");
                inner.slots.push(Slot {
                    generation: 1,
                    entry: Some(entry),
                });
                ReferenceToken::new(index, 1)
            }
        };
        drop(inner);
        self.forget(reclaimed);

        self.live.fetch_add(1, Ordering::Relaxed);
        trace!(token = %token, ?kind, type_name, "object cached");
        token
    }

    /// Resolve a token, reporting invalid or stale entries explicitly.
    ///
    /// Validity is captured once under the read lock; the returned `Arc`
    /// keeps the object usable for the rest of the caller's operation.
    pub fn resolve(&self, token: ReferenceToken) -> Result<ResolvedObject, BridgeError> {
        if token.is_null() {
            return Err(InvalidHandleError::NullToken.into());
        }

        let inner = self.inner.read();
        let slot = inner
            .slots
            .get(token.index() as usize)
            .ok_or(InvalidHandleError::UnknownToken(token))?;
        if slot.generation != token.generation() {
            return Err(LifetimeError::StaleToken(token).into());
        }
        let entry = slot.entry.as_ref().ok_or(LifetimeError::StaleToken(token))?;
        if !entry.valid {
            return Err(LifetimeError::Invalidated(token).into());
        }

        let (object, kind) = match &entry.target {
            Target::Strong(object) => (object.clone(), RefKind::Strong),
            Target::Weak(weak) => (
                weak.upgrade().ok_or(LifetimeError::Invalidated(token))?,
                RefKind::Weak,
            ),
        };

        Ok(ResolvedObject {
            token,
            class: entry.class,
            kind,
            object,
        })
    }

    /// Resolve and downcast; a wrong type is an error, never a default value
    pub fn resolve_as<T: Any + Send + Sync>(&self, token: ReferenceToken) -> Result<Arc<T>, BridgeError> {
        self.resolve(token)?
            .object
            .downcast::<T>()
            .map_err(|_| InvalidHandleError::TypeMismatch { expected: type_name::<T>() }.into())
    }

    /// Whether `token` currently resolves
    pub fn is_valid(&self, token: ReferenceToken) -> bool {
        self.resolve(token).is_ok()
    }

    /// Mark an entry invalid without freeing its slot.
    ///
    /// Strong targets are dropped immediately. Returns `false` if the entry
    /// was already invalid or the token does not name a live slot.
    pub fn invalidate(&self, token: ReferenceToken) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = Self::entry_mut(&mut inner, token) else {
            return false;
        };
        if !entry.valid {
            return false;
        }
        entry.valid = false;
        if let Target::Strong(_) = entry.target {
            entry.target = Target::Weak(Weak::<()>::new());
        }
        debug!(token = %token, type_name = entry.type_name, "cache entry invalidated");
        true
    }

    /// Free the slot; its generation moves on so the token turns stale
    pub fn release(&self, token: ReferenceToken) -> bool {
        let mut inner = self.inner.write();
        let index = token.index();
        let entry = match inner.slots.get_mut(index as usize) {
            Some(slot) if slot.generation == token.generation() => slot.vacate(),
            _ => None,
        };
        let Some(entry) = entry else {
            return false;
        };
        inner.free.push(index);
        drop(inner);

        self.forget(vec![entry]);
        trace!(token = %token, "cache slot released");
        true
    }

    /// Release every weak entry whose target has been dropped
    pub fn sweep(&self) -> usize {
        let freed = Self::sweep_locked(&mut self.inner.write());
        let count = freed.len();
        self.forget(freed);
        if count > 0 {
            debug!(released = count, "swept dead weak cache entries");
        }
        count
    }

    /// Release every entry whose object belongs to one of `classes`.
    ///
    /// Strong targets are dropped; tokens of released entries turn stale.
    pub fn release_classes(&self, classes: &HashSet<ClassHandle>) -> usize {
        if classes.is_empty() {
            return 0;
        }
        let mut inner = self.inner.write();
        let Slots { slots, free } = &mut *inner;
        let mut released = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.entry.as_ref().is_some_and(|e| classes.contains(&e.class)) {
                released.extend(slot.vacate());
                free.push(index as u32);
            }
        }
        drop(inner);

        let count = released.len();
        self.forget(released);
        if count > 0 {
            debug!(released = count, "released cache entries of removed classes");
        }
        count
    }

    fn sweep_locked(inner: &mut Slots) -> Vec<Entry> {
        let Slots { slots, free } = inner;
        let mut freed = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.entry.as_ref().is_some_and(Entry::is_dead) {
                freed.extend(slot.vacate());
                free.push(index as u32);
            }
        }
        freed
    }

    /// Drop vacated entries once the lock is released, so a target's `Drop`
    /// may use the cache
    fn forget(&self, entries: Vec<Entry>) {
        if !entries.is_empty() {
            self.live.fetch_sub(entries.len(), Ordering::Relaxed);
        }
        drop(entries);
    }

    fn entry_mut(inner: &mut Slots, token: ReferenceToken) -> Option<&mut Entry> {
        let slot = inner.slots.get_mut(token.index() as usize)?;
        if slot.generation != token.generation() {
            return None;
        }
        slot.entry.as_mut()
    }
}
