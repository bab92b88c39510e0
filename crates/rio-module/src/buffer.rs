//! `RegisteredBuffer` — memory registered with the extension.
//!
//! The buffer owns its backing allocation and its registration. Drop
//! deregisters first, then frees the memory, so the platform never holds
//! an id for freed memory.
//!
//! Segments (`RioBuf`) handed to request queues are plain values. The
//! caller keeps the buffer alive until every request using one of its
//! segments has completed; that is the contract of the `unsafe` submit
//! calls on `RequestQueue`.

use std::sync::Arc;

use rio_core::entry::{BufferId, RioBuf};
use rio_core::error::{Result, RioError};
use rio_core::extension::RioExtension;
use rio_core::rio_trace;

/// Register `len` bytes at `ptr`.
///
/// # Safety
/// The range must stay allocated until `deregister_raw` is called for the
/// returned id.
pub unsafe fn register_raw<X: RioExtension + ?Sized>(
    rio: &X,
    ptr: *mut u8,
    len: usize,
) -> Result<BufferId> {
    if ptr.is_null() {
        return Err(RioError::InvalidArgument("null buffer"));
    }
    if len == 0 || len > u32::MAX as usize {
        return Err(RioError::InvalidArgument("buffer length must be 1..=u32::MAX"));
    }
    let id = rio.register_buffer(ptr, len as u32);
    if id.is_invalid() {
        return Err(RioError::RegisterBuffer(rio.last_error()));
    }
    Ok(id)
}

/// Release a registration obtained from `register_raw`. Exactly once per id.
pub fn deregister_raw<X: RioExtension + ?Sized>(rio: &X, id: BufferId) {
    rio.deregister_buffer(id);
}

pub struct RegisteredBuffer<X: RioExtension> {
    rio: Arc<X>,
    id: BufferId,
    memory: Box<[u8]>,
}

impl<X: RioExtension> RegisteredBuffer<X> {
    /// Allocate `len` zeroed bytes and register them.
    pub fn allocate(rio: Arc<X>, len: usize) -> Result<Self> {
        Self::from_vec(rio, vec![0u8; len])
    }

    /// Register an existing allocation, taking ownership of it.
    pub fn from_vec(rio: Arc<X>, memory: Vec<u8>) -> Result<Self> {
        let mut memory = memory.into_boxed_slice();
        // Safety: the box is owned by the returned value and freed only
        // after deregistration (Drop / deregister).
        let id = unsafe { register_raw(&*rio, memory.as_mut_ptr(), memory.len())? };
        rio_trace!("buffer {:#x} registered, {} bytes", id.0, memory.len());
        Ok(Self { rio, id, memory })
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Describe `len` bytes starting at `offset`.
    pub fn segment(&self, offset: u32, len: u32) -> Result<RioBuf> {
        let end = offset as u64 + len as u64;
        if end > self.memory.len() as u64 {
            return Err(RioError::InvalidArgument("segment exceeds registered buffer"));
        }
        Ok(RioBuf {
            buffer_id: self.id,
            offset,
            length: len,
        })
    }

    /// The whole buffer as one segment.
    pub fn full_segment(&self) -> RioBuf {
        RioBuf {
            buffer_id: self.id,
            offset: 0,
            length: self.memory.len() as u32,
        }
    }

    /// Split the buffer into consecutive `seg_len`-byte segments.
    /// A trailing remainder shorter than `seg_len` is not returned.
    pub fn segments(&self, seg_len: u32) -> Vec<RioBuf> {
        if seg_len == 0 {
            return Vec::new();
        }
        let count = self.memory.len() as u64 / seg_len as u64;
        (0..count)
            .map(|i| RioBuf {
                buffer_id: self.id,
                offset: (i * seg_len as u64) as u32,
                length: seg_len,
            })
            .collect()
    }

    /// Bytes of one segment of this buffer.
    pub fn slice(&self, seg: &RioBuf) -> Result<&[u8]> {
        let range = self.range(seg)?;
        Ok(&self.memory[range])
    }

    pub fn slice_mut(&mut self, seg: &RioBuf) -> Result<&mut [u8]> {
        let range = self.range(seg)?;
        Ok(&mut self.memory[range])
    }

    fn range(&self, seg: &RioBuf) -> Result<std::ops::Range<usize>> {
        if seg.buffer_id != self.id {
            return Err(RioError::InvalidArgument("segment belongs to another buffer"));
        }
        let start = seg.offset as usize;
        let end = start + seg.length as usize;
        if end > self.memory.len() {
            return Err(RioError::InvalidArgument("segment exceeds registered buffer"));
        }
        Ok(start..end)
    }

    /// Contents. Must not be read while a receive into this buffer is in
    /// flight.
    pub fn as_slice(&self) -> &[u8] {
        &self.memory
    }

    /// Mutable contents. Must not be written while a send or receive
    /// using this buffer is in flight.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Deregister now and hand the memory back.
    pub fn deregister(self) -> Box<[u8]> {
        let mut this = std::mem::ManuallyDrop::new(self);
        deregister_raw(&*this.rio, this.id);
        // Safety: `this` is never dropped, so each field is moved out once.
        let memory = std::mem::take(&mut this.memory);
        unsafe { std::ptr::drop_in_place(&mut this.rio) };
        memory
    }
}

impl<X: RioExtension> Drop for RegisteredBuffer<X> {
    fn drop(&mut self) {
        deregister_raw(&*self.rio, self.id);
        rio_trace!("buffer {:#x} deregistered", self.id.0);
        // `memory` is freed after this body returns.
    }
}

impl<X: RioExtension> std::fmt::Debug for RegisteredBuffer<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBuffer")
            .field("id", &self.id)
            .field("len", &self.memory.len())
            .finish()
    }
}
