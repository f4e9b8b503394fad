//! Context lifecycle host functions
//!
//! Creating and destroying contexts, taking the registry lock, staging an
//! invocation and committing it.

use crate::{declare_host_function, HostEnv};
use hmvm_program_runtime::{
    storage::address_from_slice, ContextId, HostVmError, MemoryMapping, Result,
};

declare_host_function!(
    /// Allocate a new context and make it current
    ///
    /// # Returns
    /// The new context id
    HmvmCreateContext,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_registry(|guard| Ok(guard.create().0))
    }
);

declare_host_function!(
    /// Destroy the current context
    ///
    /// The id stays allocated; selecting it again fails with a not-found status.
    HmvmDestroyContext,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_registry(|guard| {
            let id = guard.current_id().ok_or(HostVmError::NoCurrentContext)?;
            guard.destroy(id)?;
            Ok(0)
        })
    }
);

declare_host_function!(
    /// Take the registry lock and hold it until `hmvm_release`
    ///
    /// # Arguments (from VM registers)
    /// * `id` - Context to make current, as a signed integer; negative keeps
    ///   the current selection
    HmvmAcquire,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping, id: u64) -> Result<u64> {
        let id = (id as i64 >= 0).then_some(ContextId(id));
        env.acquire(id)?;
        Ok(0)
    }
);

declare_host_function!(
    /// Release the registry lock taken by `hmvm_acquire`
    HmvmRelease,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.release()?;
        Ok(0)
    }
);

declare_host_function!(
    /// Stage the sender of the invocation
    ///
    /// Up to 20 bytes are taken from the guest; a shorter address is
    /// zero-filled.
    HmvmInitSender,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        let sender = address_from_slice(memory.reader(ptr, len)?.as_slice());
        env.with_context(|context| context.stage_sender(sender))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Stage the contract being invoked, binding its storage partition
    HmvmInitContractAddress,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        let address = address_from_slice(memory.reader(ptr, len)?.as_slice());
        env.with_context(|context| context.stage_contract_address(address))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Append an argument to the invocation
    HmvmInitPushArg,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        let argument = memory.reader(ptr, len)?.read();
        env.with_context(|context| context.stage_argument(argument))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Close staging
    HmvmInitDone,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_context(|context| context.finalize_init())?;
        Ok(0)
    }
);

declare_host_function!(
    /// Return the live frame to staging for reuse
    HmvmClear,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_context(|context| {
            context.clear();
            Ok(0)
        })
    }
);

declare_host_function!(
    /// Hand the invocation's read/write sets to the commit coordinator
    ///
    /// # Errors
    /// - `InvalidState` - nested calls are still active
    /// - `CommitFailure` - the coordinator rejected the sets; nothing was applied
    HmvmCommitState,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_context(|context| context.commit_state())?;
        Ok(0)
    }
);
