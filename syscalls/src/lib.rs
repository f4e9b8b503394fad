//! HMVM Syscalls
//!
//! This crate provides the host functions HMVM contracts call from inside the
//! sandbox. Host functions let a contract read its arguments, set its
//! response, emit events, read and write its own persistent state, and call
//! other contracts.
//!
//! # Architecture
//!
//! Host functions are declared with the `declare_host_function!` macro. Each
//! one:
//!
//! 1. Takes the caller's [`HostEnv`] (registry access, lock, collaborators)
//! 2. Takes the guest [`MemoryMapping`]; variable-length data crosses the
//!    boundary as `(address, length)` register pairs
//! 3. Takes its scalar registers as `u64`
//! 4. Returns `Result<u64, HostVmError>` from `rust`, and a plain status from
//!    `vm` (zero or positive on success, negative on failure)
//!
//! # Available host functions
//!
//! ## Context lifecycle
//! - `hmvm_create_context`, `hmvm_destroy_context`
//! - `hmvm_acquire`, `hmvm_release`
//! - `hmvm_init_sender`, `hmvm_init_contract_address`, `hmvm_init_push_arg`,
//!   `hmvm_init_done`, `hmvm_clear`, `hmvm_commit_state`
//!
//! ## Invocation
//! - `hmvm_get_sender`, `hmvm_get_arg`
//! - `hmvm_set_response`, `hmvm_get_response`
//! - `hmvm_push_call`, `hmvm_pop_call`
//!
//! ## Events and logging
//! - `hmvm_emit_event`, `hmvm_get_event`, `hmvm_log`
//!
//! ## Storage
//! - `hmvm_read_state`, `hmvm_write_state`
//!
//! ## Signatures (delegated)
//! - `hmvm_ecrecover`, `hmvm_ecrecover_address`
//!
//! # Reading large values
//!
//! Getters that return variable-length data take an `offset` register. They
//! copy `value[offset..]` truncated to the guest buffer and return the count,
//! so a guest with a fixed buffer loops, advancing `offset`, until it receives
//! fewer bytes than the buffer holds.
//!
//! # Usage
//!
//! ```rust
//! use hmvm_program_runtime::{ContextRegistry, ConflictCheckingCommitter, MemoryMapping, MemoryStore};
//! use hmvm_syscalls::{syscall_names, HostEnv, HostFunctionTable};
//! use std::sync::Arc;
//!
//! let registry = ContextRegistry::new(Arc::new(MemoryStore::new()), Arc::new(ConflictCheckingCommitter));
//! let table = HostFunctionTable::with_defaults();
//! let mut env = HostEnv::new(&registry);
//! let mut memory = MemoryMapping::default();
//!
//! let id = table.invoke(syscall_names::HMVM_CREATE_CONTEXT, &mut env, &mut memory, &[]);
//! assert_eq!(id, 0);
//! ```

#![warn(missing_docs)]
#![deny(clippy::arithmetic_side_effects)]

pub mod call;
pub mod crypto;
pub mod env;
pub mod events;
pub mod logging;
pub mod process;
pub mod return_data;
pub mod storage;

pub use env::HostEnv;
#[doc(hidden)]
pub use hmvm_program_runtime;

use hmvm_program_runtime::{GuestWriter, HostVmError, MemoryMapping, Result};
use std::collections::HashMap;

/// Declare a host function.
///
/// Generates a unit struct with two entry points: `rust`, the typed
/// implementation, and `vm`, which unpacks registers and turns the result into
/// a guest status code.
#[macro_export]
macro_rules! declare_host_function {
    (
        $(#[$attr:meta])*
        $name:ident,
        fn rust(
            $env:ident: &mut $env_ty:ident,
            $memory:ident: &mut $memory_ty:ident
            $(, $arg:ident: u64)*
        ) -> $result:ty $body:block
    ) => {
        $(#[$attr])*
        pub struct $name;

        impl $name {
            /// Typed host-side implementation
            #[allow(clippy::too_many_arguments)]
            pub fn rust(
                $env: &mut $env_ty<'_>,
                $memory: &mut $memory_ty<'_>,
                $($arg: u64),*
            ) -> $result $body

            /// VM entry point: registers in, status out. Missing registers read as zero.
            pub fn vm(
                env: &mut $crate::HostEnv<'_>,
                memory: &mut $crate::hmvm_program_runtime::MemoryMapping<'_>,
                args: &[u64],
            ) -> i64 {
                #[allow(unused_mut, unused_variables)]
                let mut registers = args.iter().copied();
                $(let $arg = registers.next().unwrap_or(0);)*
                $crate::into_status(stringify!($name), Self::rust(env, memory, $($arg),*))
            }
        }
    };
}

/// Turn a host function result into the status handed back to the guest
pub fn into_status(name: &str, result: Result<u64>) -> i64 {
    match result {
        Ok(value) => i64::try_from(value).unwrap_or(i64::MAX),
        Err(err) => {
            log::warn!("{} failed: {}", name, err);
            err.status_code()
        }
    }
}

/// Copy `value[offset..]` into `writer`, truncated to its capacity.
///
/// Returns the number of bytes copied; `offset == value.len()` copies nothing.
/// An offset past the end fails with `OffsetOutOfRange`.
pub fn write_buffer(writer: &mut GuestWriter<'_>, offset: u64, value: &[u8]) -> Result<u64> {
    let remaining = usize::try_from(offset)
        .ok()
        .and_then(|offset| value.get(offset..))
        .ok_or(HostVmError::OffsetOutOfRange {
            offset,
            len: value.len(),
        })?;
    let chunk = &remaining[..remaining.len().min(writer.capacity())];
    Ok(writer.write(chunk)? as u64)
}

/// Guest-visible host function signature
pub type HostFunction =
    for<'r, 'm, 'a> fn(&mut HostEnv<'r>, &mut MemoryMapping<'m>, &'a [u64]) -> i64;

/// Name-indexed table of host functions, consulted by the VM when a contract
/// performs a host call
#[derive(Default)]
pub struct HostFunctionTable {
    functions: HashMap<&'static str, HostFunction>,
}

impl HostFunctionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every HMVM host function registered
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        register_host_functions(&mut table);
        table
    }

    /// Register `function` under `name`, returning any function it replaces
    pub fn register(&mut self, name: &'static str, function: HostFunction) -> Option<HostFunction> {
        self.functions.insert(name, function)
    }

    /// Look up a host function by name
    pub fn get(&self, name: &str) -> Option<HostFunction> {
        self.functions.get(name).copied()
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    /// Dispatch a host call by name; unknown names fail with `InvalidState`
    pub fn invoke(
        &self,
        name: &str,
        env: &mut HostEnv<'_>,
        memory: &mut MemoryMapping<'_>,
        args: &[u64],
    ) -> i64 {
        match self.get(name) {
            Some(function) => function(env, memory, args),
            None => {
                let err = HostVmError::InvalidState("unknown host function");
                log::warn!("{}: {}", name, err);
                err.status_code()
            }
        }
    }
}

/// Register all HMVM host functions
///
/// # Example
///
/// ```rust
/// use hmvm_syscalls::{register_host_functions, syscall_names, HostFunctionTable};
///
/// let mut table = HostFunctionTable::new();
/// register_host_functions(&mut table);
/// assert!(table.get(syscall_names::HMVM_READ_STATE).is_some());
/// ```
pub fn register_host_functions(table: &mut HostFunctionTable) {
    use syscall_names::*;

    // Context lifecycle
    table.register(HMVM_CREATE_CONTEXT, process::HmvmCreateContext::vm);
    table.register(HMVM_DESTROY_CONTEXT, process::HmvmDestroyContext::vm);
    table.register(HMVM_ACQUIRE, process::HmvmAcquire::vm);
    table.register(HMVM_RELEASE, process::HmvmRelease::vm);
    table.register(HMVM_INIT_SENDER, process::HmvmInitSender::vm);
    table.register(HMVM_INIT_CONTRACT_ADDRESS, process::HmvmInitContractAddress::vm);
    table.register(HMVM_INIT_PUSH_ARG, process::HmvmInitPushArg::vm);
    table.register(HMVM_INIT_DONE, process::HmvmInitDone::vm);
    table.register(HMVM_CLEAR, process::HmvmClear::vm);
    table.register(HMVM_COMMIT_STATE, process::HmvmCommitState::vm);

    // Invocation
    table.register(HMVM_GET_SENDER, call::HmvmGetSender::vm);
    table.register(HMVM_GET_ARG, call::HmvmGetArg::vm);
    table.register(HMVM_PUSH_CALL, call::HmvmPushCall::vm);
    table.register(HMVM_POP_CALL, call::HmvmPopCall::vm);
    table.register(HMVM_SET_RESPONSE, return_data::HmvmSetResponse::vm);
    table.register(HMVM_GET_RESPONSE, return_data::HmvmGetResponse::vm);

    // Events and logging
    table.register(HMVM_EMIT_EVENT, events::HmvmEmitEvent::vm);
    table.register(HMVM_GET_EVENT, events::HmvmGetEvent::vm);
    table.register(HMVM_LOG, logging::HmvmLog::vm);

    // Storage
    table.register(HMVM_READ_STATE, storage::HmvmReadState::vm);
    table.register(HMVM_WRITE_STATE, storage::HmvmWriteState::vm);

    // Signatures
    table.register(HMVM_ECRECOVER, crypto::HmvmEcrecover::vm);
    table.register(HMVM_ECRECOVER_ADDRESS, crypto::HmvmEcrecoverAddress::vm);
}

/// Host function identifiers
///
/// These are the names contracts import host functions under.
pub mod syscall_names {
    /// Allocate a context and make it current
    pub const HMVM_CREATE_CONTEXT: &str = "hmvm_create_context";
    /// Destroy the current context
    pub const HMVM_DESTROY_CONTEXT: &str = "hmvm_destroy_context";
    /// Take the registry lock, optionally switching context
    pub const HMVM_ACQUIRE: &str = "hmvm_acquire";
    /// Release the registry lock
    pub const HMVM_RELEASE: &str = "hmvm_release";
    /// Stage the sender
    pub const HMVM_INIT_SENDER: &str = "hmvm_init_sender";
    /// Stage the contract address
    pub const HMVM_INIT_CONTRACT_ADDRESS: &str = "hmvm_init_contract_address";
    /// Stage an argument
    pub const HMVM_INIT_PUSH_ARG: &str = "hmvm_init_push_arg";
    /// Finalize staging
    pub const HMVM_INIT_DONE: &str = "hmvm_init_done";
    /// Reset the live frame for reuse
    pub const HMVM_CLEAR: &str = "hmvm_clear";
    /// Commit the invocation's read/write sets
    pub const HMVM_COMMIT_STATE: &str = "hmvm_commit_state";
    /// Read the sender
    pub const HMVM_GET_SENDER: &str = "hmvm_get_sender";
    /// Read an argument
    pub const HMVM_GET_ARG: &str = "hmvm_get_arg";
    /// Enter a nested call
    pub const HMVM_PUSH_CALL: &str = "hmvm_push_call";
    /// Return from a nested call
    pub const HMVM_POP_CALL: &str = "hmvm_pop_call";
    /// Set the response
    pub const HMVM_SET_RESPONSE: &str = "hmvm_set_response";
    /// Read the response
    pub const HMVM_GET_RESPONSE: &str = "hmvm_get_response";
    /// Emit an event
    pub const HMVM_EMIT_EVENT: &str = "hmvm_emit_event";
    /// Read an emitted event
    pub const HMVM_GET_EVENT: &str = "hmvm_get_event";
    /// Log a message (debug only)
    pub const HMVM_LOG: &str = "hmvm_log";
    /// Read persistent state
    pub const HMVM_READ_STATE: &str = "hmvm_read_state";
    /// Write persistent state
    pub const HMVM_WRITE_STATE: &str = "hmvm_write_state";
    /// Recover a public key from a signature
    pub const HMVM_ECRECOVER: &str = "hmvm_ecrecover";
    /// Recover an address from a signature
    pub const HMVM_ECRECOVER_ADDRESS: &str = "hmvm_ecrecover_address";
}
