//! HMVM Test Runner
//!
//! An in-process emulator for exercising contract logic against the real host
//! functions without a VM. A [`Session`] plays the guest: it owns a small
//! guest memory buffer, places its inputs there and calls host functions by
//! name through a [`HostFunctionTable`], exactly as compiled contract code
//! would. Large values come back through the offset protocol, one
//! [`CHUNK_SIZE`] slice at a time.
//!
//! # Usage
//!
//! ```rust
//! use hmvm_test_runner::{Emulator, EmulatorError};
//!
//! let emulator = Emulator::new();
//! let sum = emulator
//!     .exec_with_arguments(["1", "2"], |session| {
//!         let x: i64 = session.arg_str(0)?.parse().unwrap();
//!         let y: i64 = session.arg_str(1)?.parse().unwrap();
//!         session.write_state(b"sum", (x + y).to_string().as_bytes())?;
//!         session.commit_state()?;
//!         Ok::<_, EmulatorError>(x + y)
//!     })
//!     .unwrap();
//! assert_eq!(sum, 3);
//! ```

#![warn(missing_docs)]

use hmvm_program_runtime::{
    Address, CommitCoordinator, ConflictCheckingCommitter, ContextId, ContextRegistry, HostVmError,
    InvokeContext, MemoryMapping, MemoryRegion, MemoryStore, RuntimeConfig, VersionedStore,
    ZERO_ADDRESS,
};
use hmvm_syscalls::{syscall_names::*, HostEnv, HostFunctionTable};
use std::sync::Arc;
use thiserror::Error;

/// VM address the session's guest memory is mapped at
pub const GUEST_BASE: u64 = 0x100000000;

/// Bytes reserved for inputs handed to a single host call
pub const INPUT_AREA_SIZE: usize = 2 * 65_536 + 1024;

/// Size of the guest buffer values are read back through
pub const CHUNK_SIZE: usize = 256;

const OUTPUT_PTR: u64 = GUEST_BASE + INPUT_AREA_SIZE as u64;

/// Emulator errors
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// A host function returned a negative status
    #[error("{function} failed with status {status}")]
    HostCall {
        /// Host function name
        function: &'static str,
        /// Status it returned
        status: i64,
    },

    /// Inputs of one host call do not fit the guest input area
    #[error("guest memory exhausted: need {needed} bytes, have {available}")]
    GuestMemoryExhausted {
        /// Total input size
        needed: usize,
        /// Size of the input area
        available: usize,
    },

    /// Inspecting the context from the host side failed
    #[error(transparent)]
    Runtime(#[from] HostVmError),

    /// Value read back is not UTF-8
    #[error("value is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Host process with a private in-memory store
pub struct Emulator {
    registry: ContextRegistry,
    table: HostFunctionTable,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// Emulator in debug mode over a fresh [`MemoryStore`]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig {
            debug_mode: true,
            ..RuntimeConfig::default()
        })
    }

    /// Emulator over a fresh [`MemoryStore`] with the given configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_backend(
            Arc::new(MemoryStore::new()),
            Arc::new(ConflictCheckingCommitter),
            config,
        )
    }

    /// Emulator over caller-provided storage and commit coordination
    pub fn with_backend(
        store: Arc<dyn VersionedStore>,
        committer: Arc<dyn CommitCoordinator>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry: ContextRegistry::with_config(store, committer, config),
            table: HostFunctionTable::with_defaults(),
        }
    }

    /// The registry all sessions share
    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// A guest session that does not hold the registry lock yet
    pub fn session(&self) -> Session<'_> {
        Session::new(&self.registry, &self.table)
    }

    /// Run `f` in a fresh context with no arguments
    pub fn exec<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Session<'_>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        self.exec_with_arguments(std::iter::empty::<&[u8]>(), f)
    }

    /// Run `f` in a fresh context staged with `args`
    pub fn exec_with_arguments<A, T, E, F>(
        &self,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'_>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        self.exec_contract(ZERO_ADDRESS, ZERO_ADDRESS, args, f)
    }

    /// Run `f` as `contract` invoked by `sender` with `args`.
    ///
    /// The session holds the registry lock for the whole run, nested calls
    /// included; calling back into the same emulator from `f` deadlocks. The
    /// context is destroyed afterwards whether or not `f` succeeded.
    pub fn exec_contract<A, T, E, F>(
        &self,
        contract: Address,
        sender: Address,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'_>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        let mut session = self.session();
        session.acquire(None)?;
        let result = session.invoke(contract, sender, args, f);
        session.release()?;
        result
    }
}

/// The guest side of one VM caller
pub struct Session<'e> {
    env: HostEnv<'e>,
    table: &'e HostFunctionTable,
    guest: Vec<u8>,
}

impl<'e> Session<'e> {
    fn new(registry: &'e ContextRegistry, table: &'e HostFunctionTable) -> Self {
        Self {
            env: HostEnv::new(registry),
            table,
            guest: vec![0u8; INPUT_AREA_SIZE + CHUNK_SIZE],
        }
    }

    fn invoke<A, T, E, F>(
        &mut self,
        contract: Address,
        sender: Address,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'e>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        self.create_context()?;
        let result = self.stage_and_run(contract, sender, args, f);
        let destroyed = self.destroy_context();
        let value = result?;
        destroyed?;
        Ok(value)
    }

    fn stage_and_run<A, T, E, F>(
        &mut self,
        contract: Address,
        sender: Address,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'e>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        self.init_contract_address(&contract)?;
        self.init_sender(&sender)?;
        for arg in args {
            self.init_push_arg(arg.as_ref())?;
        }
        self.init_done()?;
        f(self)
    }

    /// Call a host function by name with raw registers
    pub fn call_host(&mut self, function: &'static str, args: &[u64]) -> Result<u64> {
        let region = MemoryRegion::new_writable(&mut self.guest, GUEST_BASE);
        let mut memory = MemoryMapping::new(vec![region]);
        let status = self.table.invoke(function, &mut self.env, &mut memory, args);
        u64::try_from(status).map_err(|_| EmulatorError::HostCall { function, status })
    }

    /// Copy `inputs` into the guest input area, returning `(address, length)` pairs
    fn place(&mut self, inputs: &[&[u8]]) -> Result<Vec<(u64, u64)>> {
        let needed = inputs.iter().map(|input| input.len()).sum();
        if needed > INPUT_AREA_SIZE {
            return Err(EmulatorError::GuestMemoryExhausted {
                needed,
                available: INPUT_AREA_SIZE,
            });
        }
        let mut cursor = 0;
        let mut placed = Vec::with_capacity(inputs.len());
        for input in inputs {
            self.guest[cursor..cursor + input.len()].copy_from_slice(input);
            placed.push((GUEST_BASE + cursor as u64, input.len() as u64));
            cursor += input.len();
        }
        Ok(placed)
    }

    fn call_with(&mut self, function: &'static str, input: &[u8]) -> Result<u64> {
        let placed = self.place(&[input])?;
        let (ptr, len) = placed[0];
        self.call_host(function, &[ptr, len])
    }

    /// Read a whole value through the offset protocol.
    ///
    /// `leading` registers come first; offset, buffer and buffer size are
    /// appended on each call until a short chunk signals the end.
    fn read_chunked(&mut self, function: &'static str, leading: &[u64]) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        loop {
            let mut args = leading.to_vec();
            args.extend([value.len() as u64, OUTPUT_PTR, CHUNK_SIZE as u64]);
            let copied = self.call_host(function, &args)? as usize;
            value.extend_from_slice(&self.guest[INPUT_AREA_SIZE..INPUT_AREA_SIZE + copied]);
            if copied < CHUNK_SIZE {
                return Ok(value);
            }
        }
    }

    // === Context lifecycle ===

    /// Allocate a context and make it current
    pub fn create_context(&mut self) -> Result<ContextId> {
        self.call_host(HMVM_CREATE_CONTEXT, &[]).map(ContextId)
    }

    /// Destroy the current context
    pub fn destroy_context(&mut self) -> Result<()> {
        self.call_host(HMVM_DESTROY_CONTEXT, &[]).map(drop)
    }

    /// Hold the registry lock, optionally switching context
    pub fn acquire(&mut self, id: Option<ContextId>) -> Result<()> {
        let id = id.map_or(-1i64 as u64, |id| id.0);
        self.call_host(HMVM_ACQUIRE, &[id]).map(drop)
    }

    /// Release the registry lock
    pub fn release(&mut self) -> Result<()> {
        self.call_host(HMVM_RELEASE, &[]).map(drop)
    }

    /// Stage the sender
    pub fn init_sender(&mut self, sender: &Address) -> Result<()> {
        self.call_with(HMVM_INIT_SENDER, sender).map(drop)
    }

    /// Stage the contract address
    pub fn init_contract_address(&mut self, contract: &Address) -> Result<()> {
        self.call_with(HMVM_INIT_CONTRACT_ADDRESS, contract).map(drop)
    }

    /// Stage an argument
    pub fn init_push_arg(&mut self, arg: &[u8]) -> Result<()> {
        self.call_with(HMVM_INIT_PUSH_ARG, arg).map(drop)
    }

    /// Finish staging
    pub fn init_done(&mut self) -> Result<()> {
        self.call_host(HMVM_INIT_DONE, &[]).map(drop)
    }

    /// Reset the live frame for another invocation
    pub fn clear(&mut self) -> Result<()> {
        self.call_host(HMVM_CLEAR, &[]).map(drop)
    }

    /// Commit everything written so far
    pub fn commit_state(&mut self) -> Result<()> {
        self.call_host(HMVM_COMMIT_STATE, &[]).map(drop)
    }

    // === Guest helpers ===

    /// Argument `index`
    pub fn arg(&mut self, index: usize) -> Result<Vec<u8>> {
        self.read_chunked(HMVM_GET_ARG, &[index as u64])
    }

    /// Argument `index` as a string
    pub fn arg_str(&mut self, index: usize) -> Result<String> {
        Ok(String::from_utf8(self.arg(index)?)?)
    }

    /// Caller of the running contract
    pub fn sender(&mut self) -> Result<Address> {
        let mut sender = ZERO_ADDRESS;
        let written = self.call_host(HMVM_GET_SENDER, &[OUTPUT_PTR, sender.len() as u64])? as usize;
        sender[..written].copy_from_slice(&self.guest[INPUT_AREA_SIZE..INPUT_AREA_SIZE + written]);
        Ok(sender)
    }

    /// Replace the response
    pub fn set_response(&mut self, response: &[u8]) -> Result<()> {
        self.call_with(HMVM_SET_RESPONSE, response).map(drop)
    }

    /// The response set so far (empty if none)
    pub fn response(&mut self) -> Result<Vec<u8>> {
        self.read_chunked(HMVM_GET_RESPONSE, &[])
    }

    /// Emit an event
    pub fn emit_event(&mut self, name: &[u8], payload: &[u8]) -> Result<()> {
        let placed = self.place(&[name, payload])?;
        let ((name_ptr, name_len), (payload_ptr, payload_len)) = (placed[0], placed[1]);
        self.call_host(HMVM_EMIT_EVENT, &[name_ptr, name_len, payload_ptr, payload_len])
            .map(drop)
    }

    /// Payload of the `occurrence`-th event named `name`
    pub fn event(&mut self, name: &[u8], occurrence: usize) -> Result<Vec<u8>> {
        let placed = self.place(&[name])?;
        let (ptr, len) = placed[0];
        self.read_chunked(HMVM_GET_EVENT, &[ptr, len, occurrence as u64])
    }

    /// Log a message (printed in debug mode)
    pub fn log(&mut self, message: &str) -> Result<()> {
        self.call_with(HMVM_LOG, message.as_bytes()).map(drop)
    }

    /// Committed value of `key` in the running contract's storage
    pub fn read_state(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let placed = self.place(&[key])?;
        let (ptr, len) = placed[0];
        self.read_chunked(HMVM_READ_STATE, &[ptr, len])
    }

    /// Buffer a write to the running contract's storage
    pub fn write_state(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let placed = self.place(&[key, value])?;
        let ((key_ptr, key_len), (value_ptr, value_len)) = (placed[0], placed[1]);
        self.call_host(HMVM_WRITE_STATE, &[key_ptr, key_len, value_ptr, value_len])
            .map(drop)
    }

    // === Nested calls ===

    /// Enter a call into `callee`; staging is up to the caller
    pub fn push_call(&mut self, callee: &Address) -> Result<()> {
        self.call_with(HMVM_PUSH_CALL, callee).map(drop)
    }

    /// Return from the active call
    pub fn pop_call(&mut self) -> Result<()> {
        self.call_host(HMVM_POP_CALL, &[]).map(drop)
    }

    /// Call `callee` with `args`, running `f` as its body.
    ///
    /// Returns the body's result together with the callee's response. The
    /// call is popped even when `f` fails.
    pub fn call<A, T, E, F>(
        &mut self,
        callee: &Address,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<(T, Vec<u8>), E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'e>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        self.push_call(callee)?;
        let result = self.run_callee(args, f);
        let popped = self.pop_call();
        let value = result?;
        popped?;
        Ok(value)
    }

    fn run_callee<A, T, E, F>(
        &mut self,
        args: impl IntoIterator<Item = A>,
        f: F,
    ) -> std::result::Result<(T, Vec<u8>), E>
    where
        A: AsRef<[u8]>,
        F: FnOnce(&mut Session<'e>) -> std::result::Result<T, E>,
        E: From<EmulatorError>,
    {
        for arg in args {
            self.init_push_arg(arg.as_ref())?;
        }
        self.init_done()?;
        let value = f(self)?;
        let response = self.response()?;
        Ok((value, response))
    }

    // === Host-side inspection ===

    /// Look at the current context from the host side
    pub fn inspect<T>(&mut self, f: impl FnOnce(&InvokeContext) -> T) -> Result<T> {
        Ok(self.env.with_context(|context| Ok(f(context)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_rejects_oversized_inputs() {
        let emulator = Emulator::new();
        let mut session = emulator.session();
        let huge = vec![0u8; INPUT_AREA_SIZE + 1];

        assert!(matches!(
            session.place(&[huge.as_slice()]),
            Err(EmulatorError::GuestMemoryExhausted { needed, .. }) if needed == INPUT_AREA_SIZE + 1
        ));
    }

    #[test]
    fn test_unlocked_session_locks_per_call() {
        let emulator = Emulator::new();
        let mut session = emulator.session();

        let id = session.create_context().unwrap();
        session.init_push_arg(b"x").unwrap();
        session.init_done().unwrap();
        assert_eq!(session.arg(0).unwrap(), b"x");

        let guard = emulator.registry().acquire(None);
        assert_eq!(guard.current_id(), Some(id));
    }

    #[test]
    fn test_failed_call_reports_function_and_status() {
        let emulator = Emulator::new();
        let err = emulator
            .exec(|session| session.arg(3))
            .unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::HostCall { function: HMVM_GET_ARG, status: -1 }
        ));
    }
}
