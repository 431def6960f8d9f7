//! Shared helpers for execution tests.
#![allow(dead_code)]

use cinnabar_core::{
    Allocator, DataType, LogicalTensor, MemoryHandle, TensorRole, TensorShape,
};
use cinnabar_runtime::SystemAllocator;

use std::sync::Arc;

pub fn f32_tensor(name: &str, dims: &[usize], role: TensorRole) -> LogicalTensor {
    LogicalTensor::new(
        name.to_string(),
        DataType::F32,
        TensorShape::Static(dims.to_vec()),
        role,
    )
}

pub fn f32_constant(name: &str, dims: &[usize], values: &[f32]) -> LogicalTensor {
    LogicalTensor::with_constant(
        name.to_string(),
        DataType::F32,
        TensorShape::Static(dims.to_vec()),
        bytemuck::cast_slice(values).to_vec(),
    )
}

pub fn handle(buf: &mut [f32]) -> MemoryHandle {
    MemoryHandle::from_slice(bytemuck::cast_slice_mut(buf))
}

pub fn system_allocator() -> Arc<dyn Allocator> {
    Arc::new(SystemAllocator::new())
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() < 1e-5,
            "element {i}: got {a}, expected {e}"
        );
    }
}
