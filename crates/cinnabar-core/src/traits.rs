//! Collaborator traits: kernels, engines, streams, and allocators.
//!
//! These are the seams of the core. The compiler resolves op nodes to
//! `ExecutableKernel` objects, the execution engine issues them to a
//! `Stream`, and all working memory comes from an `Allocator`.

use crate::handle::MemoryHandle;
use thiserror::Error;

/// Failure reported by a kernel during execution.
#[derive(Debug, Error)]
#[error("kernel '{kernel}' failed: {message}")]
pub struct KernelError {
    /// Name of the failing kernel.
    pub kernel: String,
    /// Human-readable description.
    pub message: String,
}

impl KernelError {
    /// Create a new kernel error.
    pub fn new(kernel: &str, message: impl Into<String>) -> Self {
        Self {
            kernel: kernel.to_string(),
            message: message.into(),
        }
    }
}

/// An opaque compiled kernel, resolved once at compile time.
///
/// Implementations are immutable and shared read-only across threads; all
/// per-call state arrives through `args`, in the argument order fixed by the
/// kernel's binding list in the compiled partition.
pub trait ExecutableKernel: Send + Sync {
    /// Kernel name (used for diagnostics and error reporting).
    fn name(&self) -> &str;

    /// Run the kernel against the bound argument handles.
    fn execute(&self, stream: &dyn Stream, args: &[MemoryHandle]) -> Result<(), KernelError>;
}

/// Target device abstraction handed to the compiler.
///
/// The compiler only consults `kind()` when resolving kernels; everything
/// else about the device is the kernel implementations' business.
pub trait Engine: Send + Sync {
    /// Engine kind tag (e.g. "cpu").
    fn kind(&self) -> &str;
}

/// Execution context a kernel invocation is issued against.
///
/// Synchronous in this core: `ExecutableKernel::execute` has completed its
/// work when it returns.
pub trait Stream: Send + Sync {
    /// Kind tag of the engine this stream belongs to.
    fn engine_kind(&self) -> &str;
}

/// Allocation failure from an [`Allocator`].
#[derive(Debug, Error)]
#[error("failed to allocate {size} bytes (alignment {alignment})")]
pub struct AllocError {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment in bytes.
    pub alignment: usize,
}

/// A raw byte buffer handed out by an allocator.
///
/// Plain data; ownership discipline is by convention: whoever called
/// `acquire` must `release` exactly once. RAII wrappers in the runtime
/// (`ScopedScratchpad`, the args-set arena) enforce this.
#[derive(Debug, Clone, Copy)]
pub struct RawBuffer {
    /// Base pointer. Null only for zero-sized acquisitions.
    pub ptr: *mut u8,
    /// Size in bytes.
    pub size: usize,
    /// Alignment in bytes.
    pub alignment: usize,
}

// Arena buffers live inside args sets in the process-wide resource cache,
// and the cache's one-instance-per-thread discipline guarantees exclusive
// access; same reasoning as the `MemoryHandle` impls.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    /// Handle covering this buffer.
    pub fn handle(&self) -> MemoryHandle {
        // Buffer is live until release; see ownership note above.
        unsafe { MemoryHandle::from_raw(self.ptr, self.size) }
    }
}

/// Capability that hands out raw byte buffers of a given alignment.
pub trait Allocator: Send + Sync {
    /// Acquire a buffer of at least `size` bytes at `alignment`.
    fn acquire(&self, size: usize, alignment: usize) -> Result<RawBuffer, AllocError>;

    /// Release a buffer previously returned by `acquire`.
    fn release(&self, buffer: RawBuffer);
}
