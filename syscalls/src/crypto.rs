//! Signature recovery host functions
//!
//! Recovery itself is delegated: the embedding node installs a
//! [`SignatureRecovery`] backend on the [`HostEnv`]. Without one, both host
//! functions fail with `InvalidState`.

use crate::{declare_host_function, HostEnv};
use hmvm_program_runtime::{Address, HostVmError, MemoryMapping, Result};

/// Length of a message hash
pub const HASH_LENGTH: u64 = 32;

/// Length of a recoverable signature: `r ‖ s ‖ v`
pub const SIGNATURE_LENGTH: u64 = 65;

/// Public-key recovery from a recoverable signature
pub trait SignatureRecovery: Send + Sync {
    /// Uncompressed public key that produced `signature` over `hash`
    fn recover_public_key(
        &self,
        hash: &[u8; 32],
        signature: &[u8; 65],
    ) -> std::result::Result<Vec<u8>, String>;

    /// Address derived from the recovered public key
    fn recover_address(
        &self,
        hash: &[u8; 32],
        signature: &[u8; 65],
    ) -> std::result::Result<Address, String>;
}

fn read_inputs(
    memory: &MemoryMapping,
    hash_ptr: u64,
    signature_ptr: u64,
) -> Result<([u8; 32], [u8; 65])> {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(memory.reader(hash_ptr, HASH_LENGTH)?.as_slice());
    let mut signature = [0u8; 65];
    signature.copy_from_slice(memory.reader(signature_ptr, SIGNATURE_LENGTH)?.as_slice());
    Ok((hash, signature))
}

declare_host_function!(
    /// Recover the signer's public key
    ///
    /// # Arguments (from VM registers)
    /// * `hash_ptr` - 32-byte message hash
    /// * `signature_ptr` - 65-byte signature (`r ‖ s ‖ v`)
    /// * `ptr` - Destination buffer
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// Number of bytes written
    HmvmEcrecover,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        hash_ptr: u64,
        signature_ptr: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        let (hash, signature) = read_inputs(memory, hash_ptr, signature_ptr)?;
        let public_key = env
            .signature_recovery()?
            .recover_public_key(&hash, &signature)
            .map_err(HostVmError::SignatureRecovery)?;
        let written = memory.writer(ptr, len)?.write(&public_key)?;
        Ok(written as u64)
    }
);

declare_host_function!(
    /// Recover the signer's address
    ///
    /// # Arguments (from VM registers)
    /// * `hash_ptr` - 32-byte message hash
    /// * `signature_ptr` - 65-byte signature (`r ‖ s ‖ v`)
    /// * `ptr` - Destination buffer; must hold 20 bytes
    /// * `len` - Size of the destination buffer
    ///
    /// # Returns
    /// 20
    HmvmEcrecoverAddress,
    fn rust(
        env: &mut HostEnv,
        memory: &mut MemoryMapping,
        hash_ptr: u64,
        signature_ptr: u64,
        ptr: u64,
        len: u64
    ) -> Result<u64> {
        let (hash, signature) = read_inputs(memory, hash_ptr, signature_ptr)?;
        let address = env
            .signature_recovery()?
            .recover_address(&hash, &signature)
            .map_err(HostVmError::SignatureRecovery)?;
        let written = memory.writer(ptr, len)?.write(&address)?;
        Ok(written as u64)
    }
);
