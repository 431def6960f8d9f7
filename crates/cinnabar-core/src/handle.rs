//! Raw memory handles bound to kernel argument slots.

use std::ptr;

/// A concrete memory handle: base pointer plus length in bytes.
///
/// Handles carry no ownership; the caller (for external buffers), the args
/// set (for the internal arena), or the scratchpad guard (for transient
/// slots) keeps the backing storage alive for the duration of the call.
///
/// Safety invariant: a handle bound into an execution args set is only
/// dereferenced by kernels running on the thread that owns that args set,
/// and never outside a call into the execution engine.
#[derive(Debug, Clone, Copy)]
pub struct MemoryHandle {
    ptr: *mut u8,
    len: usize,
}

// The resource cache stores args sets in a process-wide registry, so handles
// must cross thread boundaries; exclusive per-call access is guaranteed by
// the cache's one-instance-per-thread discipline.
unsafe impl Send for MemoryHandle {}
unsafe impl Sync for MemoryHandle {}

impl MemoryHandle {
    /// An unbound handle. Template args sets are filled with these.
    pub fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    /// Create a handle from a raw base pointer and length.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as the handle may be dereferenced.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Create a handle covering a mutable byte slice.
    pub fn from_slice(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    /// Whether the handle is unbound.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the handle covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// View the handle as an immutable byte slice.
    ///
    /// # Safety
    ///
    /// The backing storage must be live and not concurrently written.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }

    /// View the handle as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The backing storage must be live and not concurrently accessed.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }

    /// Derive a handle at a byte offset into this one.
    ///
    /// Used to bind arena and scratchpad slots against a base handle.
    pub fn slice_at(&self, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= self.len);
        Self {
            // Offset stays within the allocation covered by `ptr`.
            ptr: unsafe { self.ptr.add(offset) },
            len,
        }
    }
}
