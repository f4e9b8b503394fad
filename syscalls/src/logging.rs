//! Contract logging
//!
//! `hmvm_log` lets contracts print debug messages. Messages only reach the
//! host log when the context runs in debug mode.

use crate::{declare_host_function, HostEnv};
use hmvm_program_runtime::{invoke_context::abbreviate, HostVmError, MemoryMapping, Result};

/// Maximum length of a log message
pub const MAX_LOG_LENGTH: u64 = 10_000;

declare_host_function!(
    /// Log a UTF-8 encoded message from a contract
    ///
    /// # Arguments (from VM registers)
    /// * `ptr` - Message bytes
    /// * `len` - Length of the message
    ///
    /// # Returns
    /// 0 on success, whether or not the message was printed
    ///
    /// # Errors
    /// - `TooLarge` - If the message exceeds MAX_LOG_LENGTH
    /// - `InvalidState` - If the message is not valid UTF-8
    HmvmLog,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        if len > MAX_LOG_LENGTH {
            return Err(HostVmError::TooLarge {
                what: "log message",
                len,
                max: MAX_LOG_LENGTH,
            });
        }
        let message = memory.read_str(ptr, len)?;
        env.with_context(|context| {
            if context.debug_mode() {
                log::info!("[Contract {}]: {}", abbreviate(context.contract_address()), message);
            }
            Ok(0)
        })
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::HmvmCreateContext;
    use crate::test_utils::{create_test_mapping, new_registry, BASE};

    #[test]
    fn test_hmvm_log_success() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = b"Hello, HMVM!".to_vec();
        let len = data.len() as u64;
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmLog::rust(&mut env, &mut memory, BASE, len).unwrap(), 0);
    }

    #[test]
    fn test_hmvm_log_invalid_utf8() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = vec![0xff, 0xfe, 0xfd];
        let mut memory = create_test_mapping(&mut data);

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert_eq!(HmvmLog::vm(&mut env, &mut memory, &[BASE, 3]), -2);
    }

    #[test]
    fn test_hmvm_log_too_long() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut memory = MemoryMapping::default();

        HmvmCreateContext::rust(&mut env, &mut memory).unwrap();
        assert!(matches!(
            HmvmLog::rust(&mut env, &mut memory, BASE, MAX_LOG_LENGTH + 1),
            Err(HostVmError::TooLarge { what: "log message", .. })
        ));
    }

    #[test]
    fn test_hmvm_log_without_context() {
        let registry = new_registry();
        let mut env = HostEnv::new(&registry);
        let mut data = b"orphan".to_vec();
        let mut memory = create_test_mapping(&mut data);

        assert_eq!(HmvmLog::vm(&mut env, &mut memory, &[BASE, 6]), -1);
    }
}
