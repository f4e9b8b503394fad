//! Per-caller host environment
//!
//! A [`HostEnv`] is what a VM instance carries into every host call: the
//! shared registry, the registry lock if this caller currently holds it, and
//! the delegated collaborators. Host functions never reach the registry any
//! other way.

use crate::crypto::SignatureRecovery;
use hmvm_program_runtime::{
    ContextId, ContextRegistry, HostVmError, InvokeContext, RegistryGuard, Result,
};

/// Host-side state of one VM caller
pub struct HostEnv<'r> {
    registry: &'r ContextRegistry,
    held: Option<RegistryGuard<'r>>,
    signature_recovery: Option<&'r dyn SignatureRecovery>,
}

impl<'r> HostEnv<'r> {
    /// Environment over `registry`, not holding the lock
    pub fn new(registry: &'r ContextRegistry) -> Self {
        Self {
            registry,
            held: None,
            signature_recovery: None,
        }
    }

    /// Install the signature-recovery backend used by the ecrecover host functions
    pub fn with_signature_recovery(mut self, recovery: &'r dyn SignatureRecovery) -> Self {
        self.signature_recovery = Some(recovery);
        self
    }

    /// Whether this caller holds the registry lock across host calls
    pub fn is_locked(&self) -> bool {
        self.held.is_some()
    }

    /// Take the registry lock and keep it until [`HostEnv::release`]
    pub fn acquire(&mut self, id: Option<ContextId>) -> Result<()> {
        if self.held.is_some() {
            return Err(HostVmError::InvalidState("registry lock already held"));
        }
        self.held = Some(self.registry.acquire(id));
        Ok(())
    }

    /// Drop the lock taken by [`HostEnv::acquire`]
    pub fn release(&mut self) -> Result<()> {
        self.held
            .take()
            .map(RegistryGuard::release)
            .ok_or(HostVmError::InvalidState("registry lock not held"))
    }

    /// Run `f` under the registry lock.
    ///
    /// Uses the held guard if there is one, otherwise locks for the duration
    /// of this single call.
    pub fn with_registry<T>(
        &mut self,
        f: impl FnOnce(&mut RegistryGuard<'r>) -> Result<T>,
    ) -> Result<T> {
        match self.held.as_mut() {
            Some(guard) => f(guard),
            None => {
                let mut guard = self.registry.acquire(None);
                f(&mut guard)
            }
        }
    }

    /// Run `f` against the current context.
    ///
    /// A fatal error (call stack underflow) destroys the context: its
    /// bookkeeping can no longer be trusted.
    pub fn with_context<T>(
        &mut self,
        f: impl FnOnce(&mut InvokeContext) -> Result<T>,
    ) -> Result<T> {
        self.with_registry(|guard| {
            let result = f(guard.current_mut()?);
            if let Err(err) = &result {
                if err.is_fatal() {
                    if let Some(id) = guard.current_id() {
                        log::error!("aborting context {}: {}", id, err);
                        if let Err(destroy_err) = guard.destroy(id) {
                            log::error!("failed to abort context {}: {}", id, destroy_err);
                        }
                    }
                }
            }
            result
        })
    }

    /// The installed signature-recovery backend
    pub fn signature_recovery(&self) -> Result<&'r dyn SignatureRecovery> {
        self.signature_recovery
            .ok_or(HostVmError::InvalidState("no signature recovery backend installed"))
    }
}
