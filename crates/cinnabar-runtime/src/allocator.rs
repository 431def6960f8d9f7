//! System allocator backed by the global heap.

use cinnabar_core::{AllocError, Allocator, RawBuffer};

use std::alloc;
use std::ptr;

/// Aligned allocations straight from `std::alloc`.
///
/// Zero-sized acquisitions return a null buffer and never touch the heap;
/// `release` matches that by ignoring null pointers.
#[derive(Debug, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for SystemAllocator {
    fn acquire(&self, size: usize, alignment: usize) -> Result<RawBuffer, AllocError> {
        if size == 0 {
            return Ok(RawBuffer {
                ptr: ptr::null_mut(),
                size: 0,
                alignment,
            });
        }

        let layout = alloc::Layout::from_size_align(size, alignment)
            .map_err(|_| AllocError { size, alignment })?;
        // Layout is non-zero-sized here.
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(AllocError { size, alignment });
        }

        Ok(RawBuffer {
            ptr,
            size,
            alignment,
        })
    }

    fn release(&self, buffer: RawBuffer) {
        if buffer.ptr.is_null() {
            return;
        }
        // Size and alignment round-trip through RawBuffer unchanged, so the
        // layout reconstructs exactly.
        unsafe {
            let layout =
                alloc::Layout::from_size_align_unchecked(buffer.size, buffer.alignment);
            alloc::dealloc(buffer.ptr, layout);
        }
    }
}
