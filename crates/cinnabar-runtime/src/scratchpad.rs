//! Scoped scratchpad backing for one execution call.

use crate::error::Result;
use cinnabar_core::{Allocator, MemoryHandle, RawBuffer, SLOT_ALIGNMENT};

use std::sync::Arc;

/// Scratchpad storage acquired for the duration of one call.
///
/// Released back to the allocator on drop, which also covers the path where
/// a kernel fails partway through the invocation list.
pub struct ScopedScratchpad<'a> {
    allocator: &'a Arc<dyn Allocator>,
    buffer: RawBuffer,
}

impl<'a> ScopedScratchpad<'a> {
    /// Acquire `size` bytes at slot alignment.
    pub fn new(allocator: &'a Arc<dyn Allocator>, size: usize) -> Result<Self> {
        let buffer = allocator.acquire(size, SLOT_ALIGNMENT)?;
        Ok(Self { allocator, buffer })
    }

    /// Handle covering the whole scratchpad.
    pub fn handle(&self) -> MemoryHandle {
        self.buffer.handle()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.buffer.size
    }

    /// Whether the scratchpad covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.size == 0
    }
}

impl Drop for ScopedScratchpad<'_> {
    fn drop(&mut self) {
        self.allocator.release(self.buffer);
    }
}
