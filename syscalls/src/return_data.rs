//! Response host functions
//!
//! A contract sets its response while running; the host, or the calling
//! contract after `hmvm_pop_call`, reads it back in chunks.

use crate::{declare_host_function, write_buffer, HostEnv};
use hmvm_program_runtime::{HostVmError, MemoryMapping, Result};

/// Maximum response size (64 KB)
pub const MAX_RESPONSE_LEN: u64 = 65_536;

declare_host_function!(
    /// Replace the response of the running contract
    ///
    /// # Arguments (from VM registers)
    /// * `ptr` - Response bytes
    /// * `len` - Length of the response
    ///
    /// # Errors
    /// - `TooLarge` - If the response exceeds MAX_RESPONSE_LEN
    /// - `InvalidState` - If the context is not initialized
    HmvmSetResponse,
    fn rust(env: &mut HostEnv, memory: &mut MemoryMapping, ptr: u64, len: u64) -> Result<u64> {
        if len > MAX_RESPONSE_LEN {
            return Err(HostVmError::TooLarge {
                what: "response",
                len,
                max: MAX_RESPONSE_LEN,
            });
        }
        let response = memory.reader(ptr, len)?.read();
        env.with_context(|context| context.set_response(response))?;
        Ok(0)
    }
);

declare_host_function!(
    /// Copy part of the response into a guest buffer
    ///
    /// An unset response reads as empty.
    ///
    /// # Arguments (from VM registers)
    /// * `offset` - First byte of the response to copy
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// Number of bytes copied
    HmvmGetResponse,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        offset: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        env.with_context(|context| {
            let response = context.response().unwrap_or_default();
            write_buffer(&mut memory.writer(ptr, len)?, offset, response)
        })
    }
);
