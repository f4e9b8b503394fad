//! Invocation host functions: caller identity, arguments and nested calls

use crate::{declare_host_function, write_buffer, HostEnv};
use hmvm_program_runtime::{storage::address_from_slice, MemoryMapping, Result};

declare_host_function!(
    /// Copy the 20-byte sender address into a guest buffer
    ///
    /// # Arguments (from VM registers)
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer; must hold 20 bytes
    ///
    /// # Returns
    /// 20
    HmvmGetSender,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        let sender = env.with_context(|context| Ok(*context.sender()))?;
        let written = memory.writer(ptr, len)?.write(&sender)?;
        Ok(written as u64)
    }
);

declare_host_function!(
    /// Copy part of an argument into a guest buffer
    ///
    /// # Arguments (from VM registers)
    /// * `index` - Argument index
    /// * `offset` - First byte of the argument to copy
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// Number of bytes copied; fewer than `len` means the end was reached
    HmvmGetArg,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        index: u64,
        offset: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        env.with_context(|context| {
            let argument = context.argument(usize::try_from(index).unwrap_or(usize::MAX))?;
            write_buffer(&mut memory.writer(ptr, len)?, offset, argument)
        })
    }
);

declare_host_function!(
    /// Enter a nested call into the contract at the given address
    ///
    /// The callee starts uninitialized: the guest stages its arguments and
    /// calls `hmvm_init_done` before running it.
    HmvmPushCall,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        let callee = address_from_slice(memory.reader(ptr, len)?.as_slice());
        env.with_context(|context| context.push_call(callee))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Return from the active nested call
    ///
    /// Popping an empty call stack destroys the context.
    HmvmPopCall,
    fn rust(env: &mut HostEnv, _memory: &mut MemoryMapping) -> Result<u64> {
        env.with_context(|context| context.pop_call())?;
        Ok(0)
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{HmvmCreateContext, HmvmInitContractAddress, HmvmInitDone, HmvmInitPushArg};
    use crate::test_utils::{create_test_mapping, new_registry, BASE};
    use hmvm_program_runtime::HostVmError;

    const CALLER: [u8; 20] = [0xa1; 20];
    const CALLEE: [u8; 20] = [0xb2; 20];

    #[test]
    fn test_get_arg_in_chunks() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);

        let mut data = vec![0u8; 32];
        data[..10].copy_from_slice(b"abcdefghij");
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitPushArg::rust(&mut env, &mut memory, BASE, 10).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();

        let out = BASE + 16;
        let mut collected = Vec::new();
        let mut offset = 0u64;
        loop {
            let n = HmvmGetArg::rust(&mut env, &mut memory, 0, offset, out, 4).unwrap();
            collected.extend_from_slice(&memory.reader(out, n).unwrap().read());
            offset = offset.checked_add(n).unwrap();
            if n < 4 {
                break;
            }
        }
        assert_eq!(collected, b"abcdefghij");
        assert_eq!(offset, 10);

        assert!(matches!(
            HmvmGetArg::rust(&mut env, &mut memory, 0, 11, out, 4),
            Err(HostVmError::OffsetOutOfRange { offset: 11, len: 10 })
        ));
        assert!(matches!(
            HmvmGetArg::rust(&mut env, &mut memory, 1, 0, out, 4),
            Err(HostVmError::ArgumentNotFound { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_nested_call_sender_and_restore() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);

        let mut data = vec![0u8; 64];
        data[..20].copy_from_slice(&CALLER);
        data[20..40].copy_from_slice(&CALLEE);
        let mut memory = create_test_mapping(&mut data);
        let out = BASE + 40;

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitContractAddress::rust(&mut env, &mut memory, BASE, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();

        HmvmPushCall::rust(&mut env, &mut memory, BASE + 20, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmGetSender::rust(&mut env, &mut memory, out, 20).unwrap(), 20);
        assert_eq!(memory.reader(out, 20).unwrap().as_slice(), &CALLER);

        HmvmPopCall::rust(&mut env, &mut memory).unwrap();

        let guard = registry.acquire(None);
        let context = guard.current().unwrap();
        assert_eq!(context.contract_address(), &CALLER);
        assert_eq!(context.call_depth(), 0);
        assert_eq!(context.rw_sets().len(), 1);
        assert_eq!(context.rw_sets()[0].address, CALLEE);
    }

    #[test]
    fn test_get_sender_needs_room_for_address() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = vec![0x55u8; 8];
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmGetSender::vm(&mut env, &mut memory, &[BASE, 8]), -3);
        drop(memory);
        assert_eq!(data, vec![0x55u8; 8]);
    }

    #[test]
    fn test_pop_underflow_destroys_context() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut memory = MemoryMapping::default();

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmPopCall::vm(&mut env, &mut memory, &[]), -4);

        // The context is gone; further calls report it as not found
        assert_eq!(HmvmPopCall::vm(&mut env, &mut memory, &[]), -1);
        assert_eq!(registry.acquire(None).live_count(), 0);
    }
}
