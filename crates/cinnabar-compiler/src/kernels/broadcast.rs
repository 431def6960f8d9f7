//! Broadcast materialization kernel.

use super::{f32_elements, KernelBuilder};
use crate::error::PassError;
use cinnabar_core::{
    align_rank, ExecutableKernel, KernelError, MemoryHandle, OpNode, Stream, SubgraphIr,
};

use std::sync::Arc;

/// Builds [`BroadcastKernel`] instances from a Broadcast node's shapes.
pub struct BroadcastBuilder;

impl KernelBuilder for BroadcastBuilder {
    fn build(
        &self,
        node: &OpNode,
        ir: &SubgraphIr,
    ) -> Result<Arc<dyn ExecutableKernel>, PassError> {
        let src = ir.tensor(node.inputs[0])?;
        let dst = ir.tensor(node.outputs[0])?;
        let src_dims = src.shape.as_static().ok_or_else(|| {
            PassError::ShapeContradiction(format!("broadcast source '{}' has no shape", src.name))
        })?;
        let dst_dims = dst.shape.as_static().ok_or_else(|| {
            PassError::ShapeContradiction(format!("broadcast output '{}' has no shape", dst.name))
        })?;

        Ok(Arc::new(BroadcastKernel::new(src_dims, dst_dims)))
    }
}

/// Materializes a tensor to a broadcast result shape.
///
/// Source strides are the dense row-major strides with 0 substituted on
/// every axis of extent 1, after trailing-axis rank alignment; the copy is
/// then a single strided gather. Src and dst must not alias: the same source
/// element is read for many destination elements.
pub struct BroadcastKernel {
    name: String,
    src_strides: Vec<usize>,
    dst_dims: Vec<usize>,
    src_len: usize,
    dst_len: usize,
}

impl BroadcastKernel {
    pub fn new(src_dims: &[usize], dst_dims: &[usize]) -> Self {
        let aligned = align_rank(src_dims, dst_dims.len());

        let mut src_strides = vec![0usize; aligned.len()];
        let mut stride = 1;
        for axis in (0..aligned.len()).rev() {
            if aligned[axis] != 1 {
                src_strides[axis] = stride;
                stride *= aligned[axis];
            }
        }

        Self {
            name: "cpu_broadcast_f32".to_string(),
            src_strides,
            dst_dims: dst_dims.to_vec(),
            src_len: src_dims.iter().product(),
            dst_len: dst_dims.iter().product(),
        }
    }
}

impl ExecutableKernel for BroadcastKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _stream: &dyn Stream, args: &[MemoryHandle]) -> Result<(), KernelError> {
        let [src_handle, dst_handle] = args else {
            return Err(KernelError::new(
                &self.name,
                format!("expected 2 arguments, got {}", args.len()),
            ));
        };

        let src = f32_elements(src_handle, self.src_len, &self.name)?;
        let dst = f32_elements(dst_handle, self.dst_len, &self.name)?;

        unsafe {
            for flat in 0..self.dst_len {
                let mut remainder = flat;
                let mut src_index = 0;
                for axis in (0..self.dst_dims.len()).rev() {
                    let coord = remainder % self.dst_dims[axis];
                    remainder /= self.dst_dims[axis];
                    src_index += coord * self.src_strides[axis];
                }
                *dst.add(flat) = *src.add(src_index);
            }
        }

        Ok(())
    }
}
