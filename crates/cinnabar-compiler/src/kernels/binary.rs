//! Reference CPU binary elementwise kernel with fused post-ops.

use super::{apply_binary, apply_unary, f32_elements, KernelBuilder};
use crate::error::PassError;
use cinnabar_core::{
    ExecutableKernel, KernelError, MemoryHandle, OpKind, OpNode, PostOp, Stream, SubgraphIr,
};

use std::sync::Arc;

/// Builds [`BinaryKernel`] instances for f32 binary nodes.
pub struct BinaryBuilder;

impl KernelBuilder for BinaryBuilder {
    fn build(
        &self,
        node: &OpNode,
        ir: &SubgraphIr,
    ) -> Result<Arc<dyn ExecutableKernel>, PassError> {
        let output = ir.tensor(node.outputs[0])?;
        let len = output.shape.element_count().ok_or_else(|| {
            PassError::ShapeContradiction(format!(
                "output '{}' reached kernel resolution without a shape",
                output.name
            ))
        })?;

        Ok(Arc::new(BinaryKernel {
            name: format!("cpu_{}_f32", node.kind.to_string().to_lowercase()),
            kind: node.kind,
            post_ops: node.post_ops.clone(),
            len,
        }))
    }
}

/// Elementwise binary compute over equal-shape operands.
///
/// Broadcast canonicalization guarantees equal shapes, so the loop is flat.
/// Post-ops are applied to the accumulator in order before the store; binary
/// post-op operands arrive after src1, destination last. Each element of
/// src0 is read before the corresponding dst element is written, so src0 may
/// alias dst.
pub struct BinaryKernel {
    name: String,
    kind: OpKind,
    post_ops: Vec<PostOp>,
    len: usize,
}

impl ExecutableKernel for BinaryKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _stream: &dyn Stream, args: &[MemoryHandle]) -> Result<(), KernelError> {
        let binary_post_ops = self
            .post_ops
            .iter()
            .filter(|p| matches!(p, PostOp::Binary(_)))
            .count();
        let expected = 2 + binary_post_ops + 1;
        if args.len() != expected {
            return Err(KernelError::new(
                &self.name,
                format!("expected {expected} arguments, got {}", args.len()),
            ));
        }

        let src0 = f32_elements(&args[0], self.len, &self.name)?;
        let src1 = f32_elements(&args[1], self.len, &self.name)?;
        let mut extras = Vec::with_capacity(binary_post_ops);
        for arg in &args[2..args.len() - 1] {
            extras.push(f32_elements(arg, self.len, &self.name)?);
        }
        let dst = f32_elements(&args[args.len() - 1], self.len, &self.name)?;

        // Raw pointer arithmetic; bounds were checked against self.len above.
        unsafe {
            for i in 0..self.len {
                let mut acc = apply_binary(self.kind, *src0.add(i), *src1.add(i));
                let mut extra = 0;
                for post in &self.post_ops {
                    match post {
                        PostOp::Eltwise(kind) => acc = apply_unary(*kind, acc),
                        PostOp::Binary(kind) => {
                            acc = apply_binary(*kind, acc, *extras[extra].add(i));
                            extra += 1;
                        }
                    }
                }
                *dst.add(i) = acc;
            }
        }

        Ok(())
    }
}
