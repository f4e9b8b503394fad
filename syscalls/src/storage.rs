//! Storage host functions
//!
//! Keys are confined to the running contract's partition. Reads observe the
//! committed store only; writes are buffered in the frame's read/write set
//! until `hmvm_commit_state`.

use crate::{declare_host_function, write_buffer, HostEnv};
use hmvm_program_runtime::{HostVmError, MemoryMapping, Result};

/// Maximum storage key size (256 bytes)
pub const MAX_KEY_SIZE: u64 = 256;

/// Maximum storage value size (64 KB)
pub const MAX_VALUE_SIZE: u64 = 65_536;

fn check_key(len: u64) -> Result<()> {
    if len > MAX_KEY_SIZE {
        return Err(HostVmError::TooLarge {
            what: "key",
            len,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

declare_host_function!(
    /// Read part of a value from contract storage
    ///
    /// # Arguments (from VM registers)
    /// * `key_ptr` - Storage key bytes
    /// * `key_len` - Length of the key
    /// * `offset` - First byte of the value to copy
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// Number of bytes copied
    ///
    /// # Errors
    /// - `TooLarge` - If the key exceeds MAX_KEY_SIZE
    /// - `KeyNotFound` - If the key has no committed value
    ///
    /// A failed read is not recorded in the read/write set.
    HmvmReadState,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        key_ptr: u64,
        key_len: u64,
        offset: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        check_key(key_len)?;
        let key = memory.reader(key_ptr, key_len)?.read();
        let mut writer = memory.writer(ptr, len)?;
        env.with_context(|context| {
            context.read_state_with(&key, |value| {
                write_buffer(&mut writer, offset, value.ok_or(HostVmError::KeyNotFound)?)
            })
        })
    }
);

declare_host_function!(
    /// Write a value to contract storage
    ///
    /// # Arguments (from VM registers)
    /// * `key_ptr` - Storage key bytes
    /// * `key_len` - Length of the key
    /// * `value_ptr` - Value bytes
    /// * `value_len` - Length of the value
    ///
    /// # Errors
    /// - `TooLarge` - If the key or value exceeds its limit
    /// - `InvalidState` - If the context is not initialized
    HmvmWriteState,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        key_ptr: u64,
        key_len: u64,
        value_ptr: u64,
        value_len: u64
    ) -> Result<u64> {
        check_key(key_len)?;
        if value_len > MAX_VALUE_SIZE {
            return Err(HostVmError::TooLarge {
                what: "value",
                len: value_len,
                max: MAX_VALUE_SIZE,
            });
        }
        let key = memory.reader(key_ptr, key_len)?;
        let value = memory.reader(value_ptr, value_len)?.read();
        env.with_context(|context| context.write_state(key.as_slice(), value))?;
        Ok(0)
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{HmvmPopCall, HmvmPushCall};
    use crate::process::{HmvmCommitState, HmvmCreateContext, HmvmInitContractAddress, HmvmInitDone};
    use crate::test_utils::{create_test_mapping, new_registry, BASE};

    const KEY: u64 = BASE;
    const VALUE: u64 = BASE + 8;
    const OTHER_VALUE: u64 = BASE + 16;
    const CONTRACT_A: u64 = BASE + 32;
    const CONTRACT_B: u64 = BASE + 52;
    const OUT: u64 = BASE + 80;

    fn guest_memory() -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[..3].copy_from_slice(b"key");
        data[8..13].copy_from_slice(b"value");
        data[16..21].copy_from_slice(b"other");
        data[32..52].copy_from_slice(&[0xa0; 20]);
        data[52..72].copy_from_slice(&[0xb0; 20]);
        data
    }

    #[test]
    fn test_write_is_visible_after_commit_only() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = guest_memory();
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitContractAddress::rust(&mut env, &mut memory, CONTRACT_A, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();

        HmvmWriteState::rust(&mut env, &mut memory, KEY, 3, VALUE, 5).unwrap();
        assert!(matches!(
            HmvmReadState::rust(&mut env, &mut memory, KEY, 3, 0, OUT, 16),
            Err(HostVmError::KeyNotFound)
        ));

        HmvmCommitState::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmReadState::rust(&mut env, &mut memory, KEY, 3, 0, OUT, 16).unwrap(), 5);
        assert_eq!(memory.reader(OUT, 5).unwrap().as_slice(), b"value");
        assert_eq!(HmvmReadState::rust(&mut env, &mut memory, KEY, 3, 2, OUT, 2).unwrap(), 2);
        assert_eq!(memory.reader(OUT, 2).unwrap().as_slice(), b"lu");
    }

    #[test]
    fn test_failed_read_leaves_rw_set_untouched() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = guest_memory();
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitContractAddress::rust(&mut env, &mut memory, CONTRACT_A, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        HmvmWriteState::rust(&mut env, &mut memory, KEY, 3, VALUE, 5).unwrap();
        HmvmCommitState::rust(&mut env, &mut memory).unwrap();

        // Offset past the end, unmapped destination, absent key
        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &[KEY, 3, 100, OUT, 16]), -1);
        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &[KEY, 3, 0, 0xdead, 16]), -6);
        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &[VALUE, 5, 0, OUT, 16]), -1);
        let items = env.with_context(|context| Ok(context.live_rw_set().items)).unwrap();
        assert!(items.is_empty());

        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &[KEY, 3, 5, OUT, 16]), 0);
        let items = env.with_context(|context| Ok(context.live_rw_set().items)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, b"key");
        assert!(items[0].observed_version.is_some());
    }

    #[test]
    fn test_same_key_in_two_contracts_is_isolated() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = guest_memory();
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitContractAddress::rust(&mut env, &mut memory, CONTRACT_A, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        HmvmWriteState::rust(&mut env, &mut memory, KEY, 3, VALUE, 5).unwrap();

        HmvmPushCall::rust(&mut env, &mut memory, CONTRACT_B, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        HmvmWriteState::rust(&mut env, &mut memory, KEY, 3, OTHER_VALUE, 5).unwrap();
        HmvmPopCall::rust(&mut env, &mut memory).unwrap();
        HmvmCommitState::rust(&mut env, &mut memory).unwrap();

        assert_eq!(HmvmReadState::rust(&mut env, &mut memory, KEY, 3, 0, OUT, 16).unwrap(), 5);
        assert_eq!(memory.reader(OUT, 5).unwrap().as_slice(), b"value");

        HmvmPushCall::rust(&mut env, &mut memory, CONTRACT_B, 20).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmReadState::rust(&mut env, &mut memory, KEY, 3, 0, OUT, 16).unwrap(), 5);
        assert_eq!(memory.reader(OUT, 5).unwrap().as_slice(), b"other");
    }

    #[test]
    fn test_limits() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut memory = MemoryMapping::default();

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        assert!(matches!(
            HmvmWriteState::rust(&mut env, &mut memory, KEY, MAX_KEY_SIZE + 1, VALUE, 1),
            Err(HostVmError::TooLarge { what: "key", .. })
        ));
        assert!(matches!(
            HmvmWriteState::rust(&mut env, &mut memory, KEY, 3, VALUE, MAX_VALUE_SIZE + 1),
            Err(HostVmError::TooLarge { what: "value", .. })
        ));
        let oversized_key = [KEY, MAX_KEY_SIZE + 1, 0, OUT, 4];
        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &oversized_key), -2);
    }

    #[test]
    fn test_state_access_requires_initialization() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = guest_memory();
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmWriteState::vm(&mut env, &mut memory, &[KEY, 3, VALUE, 5]), -2);
        assert_eq!(HmvmReadState::vm(&mut env, &mut memory, &[KEY, 3, 0, OUT, 16]), -2);
    }
}
