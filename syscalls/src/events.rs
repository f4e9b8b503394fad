//! Event host functions
//!
//! Events are kept in emission order. Readers address them by name and by
//! occurrence within that name.

use crate::{declare_host_function, write_buffer, HostEnv};
use hmvm_program_runtime::{HostVmError, MemoryMapping, Result};

/// Maximum event name length
pub const MAX_EVENT_NAME_LEN: u64 = 256;

/// Maximum event payload size (64 KB)
pub const MAX_EVENT_PAYLOAD_LEN: u64 = 65_536;

declare_host_function!(
    /// Emit an event
    ///
    /// # Arguments (from VM registers)
    /// * `name_ptr` - Event name
    /// * `name_len` - Length of the name
    /// * `payload_ptr` - Event payload
    /// * `payload_len` - Length of the payload
    HmvmEmitEvent,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        name_ptr: u64,
        name_len: u64,
        payload_ptr: u64,
        payload_len: u64
    ) -> Result<u64> {
        if name_len > MAX_EVENT_NAME_LEN {
            return Err(HostVmError::TooLarge {
                what: "event name",
                len: name_len,
                max: MAX_EVENT_NAME_LEN,
            });
        }
        if payload_len > MAX_EVENT_PAYLOAD_LEN {
            return Err(HostVmError::TooLarge {
                what: "event payload",
                len: payload_len,
                max: MAX_EVENT_PAYLOAD_LEN,
            });
        }
        let name = memory.reader(name_ptr, name_len)?;
        let payload = memory.reader(payload_ptr, payload_len)?.read();
        env.with_context(|context| context.emit_event(name.as_slice(), payload))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Copy part of an event payload into a guest buffer
    ///
    /// # Arguments (from VM registers)
    /// * `name_ptr` - Event name
    /// * `name_len` - Length of the name
    /// * `occurrence` - Which event of that name, counting from 0
    /// * `offset` - First payload byte to copy
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// Number of bytes copied
    HmvmGetEvent,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        name_ptr: u64,
        name_len: u64,
        occurrence: u64,
        offset: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        let name = memory.reader(name_ptr, name_len)?.read();
        env.with_context(|context| {
            let payload = context.event(&name, usize::try_from(occurrence).unwrap_or(usize::MAX))?;
            write_buffer(&mut memory.writer(ptr, len)?, offset, payload)
        })
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{HmvmCreateContext, HmvmInitDone};
    use crate::test_utils::{create_test_mapping, new_registry, BASE};

    #[test]
    fn test_events_grouped_by_name() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);

        let mut data = vec![0u8; 64];
        data[..16].copy_from_slice(b"TransferApproval");
        data[16..19].copy_from_slice(b"one");
        data[19..22].copy_from_slice(b"two");
        data[22..27].copy_from_slice(b"three");
        let mut memory = create_test_mapping(&mut data);
        let (transfer, approval) = (BASE, BASE + 8);
        let out = BASE + 32;

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        HmvmInitDone::rust(&mut env, &mut memory).unwrap();
        HmvmEmitEvent::rust(&mut env, &mut memory, transfer, 8, BASE + 16, 3).unwrap();
        HmvmEmitEvent::rust(&mut env, &mut memory, approval, 8, BASE + 19, 3).unwrap();
        HmvmEmitEvent::rust(&mut env, &mut memory, transfer, 8, BASE + 22, 5).unwrap();

        let n = HmvmGetEvent::rust(&mut env, &mut memory, transfer, 8, 1, 0, out, 16).unwrap();
        assert_eq!(n, 5);
        assert_eq!(memory.reader(out, 5).unwrap().as_slice(), b"three");
        let n = HmvmGetEvent::rust(&mut env, &mut memory, approval, 8, 0, 1, out, 16).unwrap();
        assert_eq!(n, 2);
        assert_eq!(memory.reader(out, 2).unwrap().as_slice(), b"wo");

        assert!(matches!(
            HmvmGetEvent::rust(&mut env, &mut memory, approval, 8, 1, 0, out, 16),
            Err(HostVmError::EventNotFound { occurrence: 1, .. })
        ));
        assert_eq!(HmvmGetEvent::vm(&mut env, &mut memory, &[approval, 8, 1, 0, out, 16]), -1);
    }

    #[test]
    fn test_emit_requires_initialization() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = vec![0u8; 8];
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmEmitEvent::vm(&mut env, &mut memory, &[BASE, 4, BASE + 4, 4]), -2);
    }
}
