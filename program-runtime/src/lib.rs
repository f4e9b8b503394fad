//! HMVM Program Runtime
//!
//! This crate is the host side of the HMVM contract sandbox. Contract code
//! runs isolated from host memory and storage; everything it does to the
//! outside world goes through host functions (see `hmvm-syscalls`), and those
//! host functions operate on the state kept here.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        VM sandbox / interpreter         │
//! └────────────────┬────────────────────────┘
//!                  │ host calls: (address, length) pairs, integer status
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │        hmvm-syscalls (separate)         │
//! │  - hmvm_get_arg, hmvm_write_state, ...  │
//! └────────────────┬────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │   hmvm-program-runtime (this crate)     │
//! │  ┌─────────────────────────────────┐    │
//! │  │    ContextRegistry              │    │
//! │  │  - lock-arbitrated "current"    │    │
//! │  │  - owns every InvokeContext     │    │
//! │  └─────────────────────────────────┘    │
//! │  ┌─────────────────────────────────┐    │
//! │  │    InvokeContext                │    │
//! │  │  - staging / lifecycle          │    │
//! │  │  - nested call stack            │    │
//! │  │  - read/write-set ledger        │    │
//! │  └─────────────────────────────────┘    │
//! │  ┌─────────────────────────────────┐    │
//! │  │    Memory bridge / StoreView    │    │
//! │  └─────────────────────────────────┘    │
//! └────────────────┬────────────────────────┘
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  VersionedStore + CommitCoordinator     │
//! │  (node storage, conflict checking)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use hmvm_program_runtime::{ContextRegistry, ConflictCheckingCommitter, MemoryStore};
//! use std::sync::Arc;
//!
//! let registry = ContextRegistry::new(Arc::new(MemoryStore::new()), Arc::new(ConflictCheckingCommitter));
//!
//! let mut guard = registry.acquire(None);
//! let id = guard.create();
//! let context = guard.current_mut().unwrap();
//! context.stage_contract_address([1u8; 20]).unwrap();
//! context.stage_argument(b"42".to_vec()).unwrap();
//! context.finalize_init().unwrap();
//!
//! context.write_state(b"answer", b"42".to_vec()).unwrap();
//! context.commit_state().unwrap();
//! guard.destroy(id).unwrap();
//! ```

#![warn(missing_docs)]
#![deny(clippy::arithmetic_side_effects)]

pub mod config;
pub mod error;
pub mod invoke_context;
pub mod memory;
pub mod registry;
pub mod storage;

// Re-export main types
pub use config::RuntimeConfig;
pub use error::{ErrorKind, HostVmError, Result};
pub use invoke_context::{Event, Frame, InvokeContext};
pub use memory::{GuestReader, GuestWriter, MemoryMapping, MemoryRegion};
pub use registry::{ContextId, ContextRegistry, RegistryGuard};
pub use storage::{
    Address, CommitCoordinator, CommitError, ConflictCheckingCommitter, MemoryStore, NoOpStore,
    RwSet, RwSetItem, StoreView, Version, VersionedStore, VersionedValue, ZERO_ADDRESS,
};
