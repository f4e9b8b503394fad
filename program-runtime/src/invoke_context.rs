//! Program invocation context for HMVM
//!
//! An [`InvokeContext`] is the live session of one top-level contract
//! invocation. It holds the identity and arguments of the running frame, the
//! saved frames of every caller above it, the read/write sets of finished
//! sub-invocations, and the events emitted so far.
//!
//! Nested calls move frames rather than copy them: `push_call` parks the live
//! frame on the call stack and installs a fresh one for the callee, and
//! `pop_call` moves the caller's frame back after closing the callee's store
//! view into a [`RwSet`]. The ledger therefore grows in call-exit order.

use crate::{
    config::RuntimeConfig,
    error::{HostVmError, Result},
    registry::ContextId,
    storage::{
        Address, CommitCoordinator, RwSet, StoreView, Version, VersionedStore, ZERO_ADDRESS,
    },
};
use std::sync::Arc;

/// Short hex form of an address for log lines
pub fn abbreviate(address: &Address) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}..",
        address[0], address[1], address[2], address[3]
    )
}

/// An event emitted by a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name
    pub name: Vec<u8>,
    /// Opaque payload
    pub payload: Vec<u8>,
}

/// Per-invocation fields, saved on call entry and restored on return
#[derive(Debug)]
pub struct Frame {
    initialized: bool,
    sender: Address,
    contract_address: Address,
    arguments: Vec<Vec<u8>>,
    response: Option<Vec<u8>>,
    store_view: StoreView,
}

impl Frame {
    fn new(store: Arc<dyn VersionedStore>, sender: Address, contract_address: Address) -> Self {
        Self {
            initialized: false,
            sender,
            contract_address,
            arguments: Vec::new(),
            response: None,
            store_view: StoreView::new(store, contract_address),
        }
    }

    /// Whether staging was finalized for this frame
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Caller of this frame
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Contract running in this frame
    pub fn contract_address(&self) -> &Address {
        &self.contract_address
    }

    /// Staged arguments
    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.arguments
    }

    /// Response set in this frame, if any
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }
}

/// Execution context of one contract invocation
pub struct InvokeContext {
    id: ContextId,

    // === Live frame and saved callers ===
    frame: Frame,
    call_stack: Vec<Frame>,

    // === Accumulated results ===
    /// Read/write sets of finished sub-invocations, in exit order
    rw_sets: Vec<RwSet>,
    events: Vec<Event>,

    // === Collaborators ===
    store: Arc<dyn VersionedStore>,
    committer: Arc<dyn CommitCoordinator>,
    config: RuntimeConfig,
}

impl InvokeContext {
    /// Creates an uninitialized context bound to the zero contract address
    pub fn new(
        id: ContextId,
        store: Arc<dyn VersionedStore>,
        committer: Arc<dyn CommitCoordinator>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            id,
            frame: Frame::new(store.clone(), ZERO_ADDRESS, ZERO_ADDRESS),
            call_stack: Vec::new(),
            rw_sets: Vec::new(),
            events: Vec::new(),
            store,
            committer,
            config,
        }
    }

    /// Registry id of this context
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Whether contract log lines should be emitted
    pub fn debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    // === Live frame accessors ===

    /// Whether the live frame has been finalized
    pub fn is_initialized(&self) -> bool {
        self.frame.initialized
    }

    /// Sender of the live frame
    pub fn sender(&self) -> &Address {
        &self.frame.sender
    }

    /// Contract of the live frame
    pub fn contract_address(&self) -> &Address {
        &self.frame.contract_address
    }

    /// Arguments staged for the live frame
    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.frame.arguments
    }

    /// Argument `index` of the live frame
    pub fn argument(&self, index: usize) -> Result<&[u8]> {
        self.frame
            .arguments
            .get(index)
            .map(Vec::as_slice)
            .ok_or(HostVmError::ArgumentNotFound {
                index,
                count: self.frame.arguments.len(),
            })
    }

    /// Response of the live frame
    pub fn response(&self) -> Option<&[u8]> {
        self.frame.response()
    }

    /// Number of saved caller frames
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Saved caller frames, most recent first
    pub fn call_stack(&self) -> impl Iterator<Item = &Frame> {
        self.call_stack.iter().rev()
    }

    /// Read/write sets of finished sub-invocations, in exit order
    pub fn rw_sets(&self) -> &[RwSet] {
        &self.rw_sets
    }

    /// Accesses recorded by the live frame since it was opened
    pub fn live_rw_set(&self) -> RwSet {
        self.frame.store_view.rw_set()
    }

    /// All events, in emission order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    fn ensure_staging(&self) -> Result<()> {
        if self.frame.initialized {
            return Err(HostVmError::InvalidState("context already initialized"));
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.frame.initialized {
            return Err(HostVmError::InvalidState("context not initialized"));
        }
        Ok(())
    }

    // === Staging ===

    /// Set the sender before initialization
    pub fn stage_sender(&mut self, sender: Address) -> Result<()> {
        self.ensure_staging()?;
        self.frame.sender = sender;
        Ok(())
    }

    /// Append an argument before initialization
    pub fn stage_argument(&mut self, argument: Vec<u8>) -> Result<()> {
        self.ensure_staging()?;
        self.frame.arguments.push(argument);
        Ok(())
    }

    /// Bind the live frame to `address`, opening a fresh view of its partition
    pub fn stage_contract_address(&mut self, address: Address) -> Result<()> {
        self.ensure_staging()?;
        self.frame.contract_address = address;
        self.frame.store_view = StoreView::new(self.store.clone(), address);
        Ok(())
    }

    /// Close staging; allowed exactly once per initialization cycle
    pub fn finalize_init(&mut self) -> Result<()> {
        self.ensure_staging()?;
        self.frame.initialized = true;
        log::debug!(
            "context {} initialized: contract {} sender {} with {} argument(s)",
            self.id,
            abbreviate(&self.frame.contract_address),
            abbreviate(&self.frame.sender),
            self.frame.arguments.len()
        );
        Ok(())
    }

    /// Return the live frame to staging for reuse
    pub fn clear(&mut self) {
        self.frame.initialized = false;
        self.frame.sender = ZERO_ADDRESS;
        self.frame.arguments.clear();
        self.frame.response = None;
    }

    // === Results ===

    /// Replace the response of the live frame
    pub fn set_response(&mut self, response: Vec<u8>) -> Result<()> {
        self.ensure_initialized()?;
        self.frame.response = Some(response);
        Ok(())
    }

    /// Append an event
    pub fn emit_event(&mut self, name: &[u8], payload: Vec<u8>) -> Result<()> {
        self.ensure_initialized()?;
        self.events.push(Event {
            name: name.to_vec(),
            payload,
        });
        Ok(())
    }

    /// Payload of the `occurrence`-th event named `name`
    pub fn event(&self, name: &[u8], occurrence: usize) -> Result<&[u8]> {
        self.events
            .iter()
            .filter(|event| event.name == name)
            .nth(occurrence)
            .map(|event| event.payload.as_slice())
            .ok_or_else(|| HostVmError::EventNotFound {
                name: String::from_utf8_lossy(name).into_owned(),
                occurrence,
            })
    }

    // === Persistent state ===

    /// Read a key from the live contract's partition
    pub fn read_state(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        self.frame.store_view.get(key)
    }

    /// Read a key and hand its committed value to `f`.
    ///
    /// The read enters the read/write set only if `f` succeeds, so a rejected
    /// copy leaves the ledger untouched.
    pub fn read_state_with<T>(
        &mut self,
        key: &[u8],
        f: impl FnOnce(Option<&[u8]>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_initialized()?;
        let found = self.frame.store_view.peek(key)?;
        let version = found.as_ref().map_or(Version::ZERO, |v| v.version);
        let output = f(found.as_ref().map(|v| v.value.as_slice()))?;
        self.frame.store_view.record_read(key, version);
        Ok(output)
    }

    /// Buffer a write to the live contract's partition
    pub fn write_state(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.ensure_initialized()?;
        self.frame.store_view.set(key, value);
        Ok(())
    }

    // === Nested calls ===

    /// Enter a call from the live contract into `callee`.
    ///
    /// The callee frame starts uninitialized, with the caller's contract as its
    /// sender and a fresh view of the callee's partition.
    pub fn push_call(&mut self, callee: Address) -> Result<()> {
        self.ensure_initialized()?;
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(HostVmError::CallDepthExceeded(self.config.max_call_depth));
        }
        let callee_frame = Frame::new(self.store.clone(), self.frame.contract_address, callee);
        let caller_frame = std::mem::replace(&mut self.frame, callee_frame);
        self.call_stack.push(caller_frame);
        log::debug!(
            "context {} call {} -> {} (depth {})",
            self.id,
            abbreviate(&self.frame.sender),
            abbreviate(&callee),
            self.call_stack.len()
        );
        Ok(())
    }

    /// Return from the live call, restoring the caller's frame.
    ///
    /// Fails with `StackUnderflow` when no call is active; the context must be
    /// discarded in that case.
    pub fn pop_call(&mut self) -> Result<()> {
        let caller_frame = self.call_stack.pop().ok_or(HostVmError::StackUnderflow)?;
        let callee_frame = std::mem::replace(&mut self.frame, caller_frame);
        let rw_set = callee_frame.store_view.close();
        log::debug!(
            "context {} return {} -> {} ({} key(s) touched)",
            self.id,
            abbreviate(&rw_set.address),
            abbreviate(&self.frame.contract_address),
            rw_set.items.len()
        );
        self.rw_sets.push(rw_set);
        Ok(())
    }

    // === Commit ===

    /// Submit every read/write set of this invocation to the coordinator.
    ///
    /// The finished sub-invocations come first in exit order, followed by the
    /// live frame's set. Only legal with an empty call stack. A coordinator
    /// error is returned as-is and leaves the ledger in place.
    pub fn commit_state(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if !self.call_stack.is_empty() {
            return Err(HostVmError::InvalidState("commit with active nested calls"));
        }

        let mut sets = self.rw_sets.clone();
        sets.push(self.frame.store_view.rw_set());
        self.committer
            .commit(self.store.as_ref(), &sets, self.config.commit_version)?;

        log::debug!(
            "context {} committed {} read/write set(s) at {:?}",
            self.id,
            sets.len(),
            self.config.commit_version
        );
        self.rw_sets.clear();
        self.frame.store_view = StoreView::new(self.store.clone(), self.frame.contract_address);
        Ok(())
    }
}

impl std::fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeContext")
            .field("id", &self.id)
            .field("frame", &self.frame)
            .field("call_depth", &self.call_stack.len())
            .field("rw_sets", &self.rw_sets.len())
            .field("events", &self.events.len())
            .finish()
    }
}
