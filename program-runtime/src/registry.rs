//! Registry of live execution contexts
//!
//! Several VM instances may share one host process. The registry owns every
//! [`InvokeContext`] and arbitrates which one is current. All access goes
//! through a [`RegistryGuard`], obtained from [`ContextRegistry::acquire`]:
//! holding the guard is holding the process-wide lock, so "current" can never
//! change under a running host function.

use crate::{
    config::RuntimeConfig,
    error::{HostVmError, Result},
    invoke_context::InvokeContext,
    storage::{CommitCoordinator, VersionedStore},
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of an execution context; allocated in increasing order and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct Slots {
    /// Indexed by id; destroyed contexts leave a tombstone
    contexts: Vec<Option<InvokeContext>>,
    current: Option<ContextId>,
}

impl Slots {
    fn slot(&self, id: ContextId) -> Result<&InvokeContext> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.contexts.get(index))
            .ok_or(HostVmError::ContextNotFound(id))?
            .as_ref()
            .ok_or(HostVmError::ContextDestroyed(id))
    }

    fn slot_mut(&mut self, id: ContextId) -> Result<&mut InvokeContext> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.contexts.get_mut(index))
            .ok_or(HostVmError::ContextNotFound(id))?
            .as_mut()
            .ok_or(HostVmError::ContextDestroyed(id))
    }
}

/// Owner of all execution contexts of one host process
pub struct ContextRegistry {
    slots: Mutex<Slots>,
    store: Arc<dyn VersionedStore>,
    committer: Arc<dyn CommitCoordinator>,
    config: RuntimeConfig,
}

impl ContextRegistry {
    /// Creates a registry over a shared store with the default configuration
    pub fn new(store: Arc<dyn VersionedStore>, committer: Arc<dyn CommitCoordinator>) -> Self {
        Self::with_config(store, committer, RuntimeConfig::default())
    }

    /// Creates a registry whose contexts all inherit `config`
    pub fn with_config(
        store: Arc<dyn VersionedStore>,
        committer: Arc<dyn CommitCoordinator>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            store,
            committer,
            config,
        }
    }

    /// Block until the registry lock is held, optionally switching the current
    /// context to `id` first.
    ///
    /// The lock is released when the guard is dropped.
    pub fn acquire(&self, id: Option<ContextId>) -> RegistryGuard<'_> {
        // A panicking holder cannot leave `Slots` half-updated: every mutation
        // is a single assignment or push.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = id {
            slots.current = Some(id);
        }
        RegistryGuard {
            slots,
            registry: self,
        }
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the registry; proof that the process-wide lock is held
pub struct RegistryGuard<'a> {
    slots: MutexGuard<'a, Slots>,
    registry: &'a ContextRegistry,
}

impl RegistryGuard<'_> {
    /// Allocate a new context and make it current
    pub fn create(&mut self) -> ContextId {
        let id = ContextId(self.slots.contexts.len() as u64);
        let context = InvokeContext::new(
            id,
            self.registry.store.clone(),
            self.registry.committer.clone(),
            self.registry.config.clone(),
        );
        self.slots.contexts.push(Some(context));
        self.slots.current = Some(id);
        log::debug!("created context {}", id);
        id
    }

    /// Tombstone a context; its id is never handed out again
    pub fn destroy(&mut self, id: ContextId) -> Result<()> {
        let slot = usize::try_from(id.0)
            .ok()
            .and_then(|index| self.slots.contexts.get_mut(index))
            .ok_or(HostVmError::ContextNotFound(id))?;
        if slot.take().is_none() {
            return Err(HostVmError::ContextDestroyed(id));
        }
        log::debug!("destroyed context {}", id);
        Ok(())
    }

    /// Id selected as current, if any
    pub fn current_id(&self) -> Option<ContextId> {
        self.slots.current
    }

    /// Select `id` as current without checking that it is live
    pub fn switch(&mut self, id: ContextId) {
        self.slots.current = Some(id);
    }

    /// The current context
    pub fn current(&self) -> Result<&InvokeContext> {
        let id = self.slots.current.ok_or(HostVmError::NoCurrentContext)?;
        self.slots.slot(id)
    }

    /// The current context, mutably
    pub fn current_mut(&mut self) -> Result<&mut InvokeContext> {
        let id = self.slots.current.ok_or(HostVmError::NoCurrentContext)?;
        self.slots.slot_mut(id)
    }

    /// Any context by id
    pub fn get(&self, id: ContextId) -> Result<&InvokeContext> {
        self.slots.slot(id)
    }

    /// Any context by id, mutably
    pub fn get_mut(&mut self, id: ContextId) -> Result<&mut InvokeContext> {
        self.slots.slot_mut(id)
    }

    /// Number of contexts that have not been destroyed
    pub fn live_count(&self) -> usize {
        self.slots.contexts.iter().filter(|slot| slot.is_some()).count()
    }

    /// Release the lock explicitly
    pub fn release(self) {}
}
