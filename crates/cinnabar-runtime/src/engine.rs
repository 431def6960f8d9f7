//! CPU engine and stream.

use cinnabar_core::{Engine, Stream};

/// The host CPU as a compilation target.
#[derive(Debug, Default)]
pub struct CpuEngine;

impl CpuEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for CpuEngine {
    fn kind(&self) -> &str {
        "cpu"
    }
}

/// Synchronous execution context on the host CPU.
///
/// CPU kernels run to completion inside `execute`, so the stream carries no
/// state beyond its kind tag.
#[derive(Debug, Default)]
pub struct CpuStream;

impl CpuStream {
    pub fn new() -> Self {
        Self
    }
}

impl Stream for CpuStream {
    fn engine_kind(&self) -> &str {
        "cpu"
    }
}
