//! The Cinnabar execution runtime.
//!
//! Hosts everything that runs a [`CompiledPartition`](cinnabar_core::CompiledPartition):
//! the synchronous CPU engine and stream, the system allocator, scoped
//! scratchpad storage, and the execution entry points. Compilation lives in
//! `cinnabar-compiler`; this crate only consumes its artifacts.

pub mod allocator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod scratchpad;

pub use allocator::SystemAllocator;
pub use engine::{CpuEngine, CpuStream};
pub use error::{ExecError, Result};
pub use executor::{execute, execute_with_scratchpad};
pub use scratchpad::ScopedScratchpad;
