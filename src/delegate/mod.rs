//! Delegate/event bridge
//!
//! A [`DelegateBinding`] is the live subscription of one host target to a
//! native event delegate. The target sits in the object cache as a weak
//! entry; the binding itself holds the strong reference that keeps it alive.
//!
//! Disposal order: mark disposed, invalidate the cache entry, drop the
//! native subscription synchronously, free the cache slot. An invocation
//! that resolves the token after `dispose` returns fails with
//! `LifetimeError::Invalidated`; one that resolved it before keeps its own
//! `Arc` and completes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::handles::{ClassHandle, DelegateHandle, HandlerToken, ReferenceToken};
use crate::interop::HostObject;
use crate::logging::debug;
use crate::stats::Counters;

#[cfg(test)]
mod tests;

/// Disposable subscription returned by [`Bridge::bind`]
pub struct DelegateBinding {
    bridge: Arc<Bridge>,
    delegate: DelegateHandle,
    class: ClassHandle,
    token: ReferenceToken,
    handler: HandlerToken,
    disposed: AtomicBool,
    target: Mutex<Option<HostObject>>,
}

impl DelegateBinding {
    pub(crate) fn new(
        bridge: Arc<Bridge>,
        delegate: DelegateHandle,
        class: ClassHandle,
        token: ReferenceToken,
        handler: HandlerToken,
        target: HostObject,
    ) -> Self {
        Self {
            bridge,
            delegate,
            class,
            token,
            handler,
            disposed: AtomicBool::new(false),
            target: Mutex::new(Some(target)),
        }
    }

    #[inline]
    pub fn delegate(&self) -> DelegateHandle {
        self.delegate
    }

    #[inline]
    pub fn class(&self) -> ClassHandle {
        self.class
    }

    /// Cache token the native side uses as the receiver
    #[inline]
    pub fn token(&self) -> ReferenceToken {
        self.token
    }

    #[inline]
    pub fn handler(&self) -> HandlerToken {
        self.handler
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Drop the subscription.
    ///
    /// Returns `true` for the call that performed the disposal; every later
    /// call, including the one from `Drop`, is a no-op.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let cache = self.bridge.cache();
        cache.invalidate(self.token);
        self.bridge.runtime().destroy_handler(self.handler);
        cache.release(self.token);
        self.target.lock().take();
        Counters::drop_one(&self.bridge.counters().bound_delegates);

        debug!(
            delegate = %self.delegate,
            handler = %self.handler,
            token = %self.token,
            "delegate binding disposed"
        );
        true
    }
}

impl Drop for DelegateBinding {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl core::fmt::Debug for DelegateBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DelegateBinding")
            .field("delegate", &self.delegate)
            .field("class", &self.class)
            .field("token", &self.token)
            .field("handler", &self.handler)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
