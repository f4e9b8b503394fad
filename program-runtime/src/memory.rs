//! Memory bridge between the host and guest address spaces.
//!
//! Host functions never touch guest memory through bare addresses. An
//! `(address, length)` pair is validated once against the [`MemoryMapping`]
//! when it crosses the boundary, and from then on it is only reachable as a
//! [`GuestReader`] or [`GuestWriter`] scoped to exactly that range.

use crate::error::{HostVmError, Result};
use std::ops::Range;

/// Read capability over a fixed guest range
#[derive(Debug, Clone, Copy)]
pub struct GuestReader<'a> {
    bytes: &'a [u8],
}

impl<'a> GuestReader<'a> {
    /// Wrap an already-translated host slice
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Build a reader directly from a raw guest pointer.
    ///
    /// A zero length never dereferences `addr`.
    ///
    /// # Safety
    /// When `len > 0`, `addr` must be valid for reads of `len` bytes for the
    /// whole lifetime `'a` and must not be mutated through another alias.
    pub unsafe fn from_raw_parts(addr: *const u8, len: usize) -> Self {
        if len == 0 {
            return Self { bytes: &[] };
        }
        Self {
            bytes: std::slice::from_raw_parts(addr, len),
        }
    }

    /// Declared length of the range
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Owned copy of exactly `len()` bytes
    pub fn read(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Borrow the range without copying
    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Write capability over a fixed guest range
#[derive(Debug)]
pub struct GuestWriter<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestWriter<'a> {
    /// Wrap an already-translated host slice
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Build a writer directly from a raw guest pointer.
    ///
    /// # Safety
    /// When `len > 0`, `addr` must be valid for writes of `len` bytes for the
    /// whole lifetime `'a` and must not be aliased.
    pub unsafe fn from_raw_parts(addr: *mut u8, len: usize) -> Self {
        if len == 0 {
            return Self { bytes: &mut [] };
        }
        Self {
            bytes: std::slice::from_raw_parts_mut(addr, len),
        }
    }

    /// Number of bytes the destination can hold
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Copy `data` to the start of the destination.
    ///
    /// Either all of `data` is written, or nothing is: an oversized payload
    /// fails with `CapacityExceeded` and leaves the destination untouched.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.bytes.len() {
            return Err(HostVmError::CapacityExceeded {
                needed: data.len(),
                capacity: self.bytes.len(),
            });
        }
        self.bytes[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

#[derive(Debug)]
enum RegionData<'a> {
    ReadOnly(&'a [u8]),
    Writable(&'a mut [u8]),
}

impl RegionData<'_> {
    fn len(&self) -> usize {
        match self {
            RegionData::ReadOnly(bytes) => bytes.len(),
            RegionData::Writable(bytes) => bytes.len(),
        }
    }
}

/// A contiguous piece of guest memory placed at a VM address
#[derive(Debug)]
pub struct MemoryRegion<'a> {
    vm_addr: u64,
    data: RegionData<'a>,
}

impl<'a> MemoryRegion<'a> {
    /// Region the guest may only read (and host functions only read from)
    pub fn new_readonly(data: &'a [u8], vm_addr: u64) -> Self {
        Self {
            vm_addr,
            data: RegionData::ReadOnly(data),
        }
    }

    /// Region host functions may write results into
    pub fn new_writable(data: &'a mut [u8], vm_addr: u64) -> Self {
        Self {
            vm_addr,
            data: RegionData::Writable(data),
        }
    }

    /// First VM address of the region
    pub fn vm_addr(&self) -> u64 {
        self.vm_addr
    }

    /// Host range of `[vm_addr, vm_addr + len)` inside this region, if contained
    fn range_of(&self, vm_addr: u64, len: u64) -> Option<Range<usize>> {
        let start = usize::try_from(vm_addr.checked_sub(self.vm_addr)?).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

/// The guest address space as seen by host functions
#[derive(Debug, Default)]
pub struct MemoryMapping<'a> {
    regions: Vec<MemoryRegion<'a>>,
}

impl<'a> MemoryMapping<'a> {
    /// Build a mapping from non-overlapping regions
    pub fn new(regions: Vec<MemoryRegion<'a>>) -> Self {
        Self { regions }
    }

    fn locate(&self, vm_addr: u64, len: u64) -> Result<(usize, Range<usize>)> {
        self.regions
            .iter()
            .enumerate()
            .find_map(|(index, region)| region.range_of(vm_addr, len).map(|range| (index, range)))
            .ok_or(HostVmError::MemoryAccessViolation { address: vm_addr, len })
    }

    /// Validate `(vm_addr, len)` and hand out a read capability for it
    pub fn reader(&self, vm_addr: u64, len: u64) -> Result<GuestReader<'_>> {
        if len == 0 {
            return Ok(GuestReader::new(&[]));
        }
        let (index, range) = self.locate(vm_addr, len)?;
        let bytes: &[u8] = match &self.regions[index].data {
            RegionData::ReadOnly(bytes) => &bytes[range],
            RegionData::Writable(bytes) => &bytes[range],
        };
        Ok(GuestReader::new(bytes))
    }

    /// Validate `(vm_addr, len)` and hand out a write capability for it
    pub fn writer(&mut self, vm_addr: u64, len: u64) -> Result<GuestWriter<'_>> {
        if len == 0 {
            return Ok(GuestWriter::new(&mut []));
        }
        let (index, range) = self.locate(vm_addr, len)?;
        match &mut self.regions[index].data {
            RegionData::Writable(bytes) => Ok(GuestWriter::new(&mut bytes[range])),
            RegionData::ReadOnly(_) => {
                Err(HostVmError::MemoryAccessViolation { address: vm_addr, len })
            }
        }
    }

    /// Read a UTF-8 string from guest memory
    pub fn read_str(&self, vm_addr: u64, len: u64) -> Result<&str> {
        let reader = self.reader(vm_addr, len)?;
        std::str::from_utf8(reader.as_slice())
            .map_err(|_| HostVmError::InvalidState("invalid UTF-8 string"))
    }
}
