//! Reference CPU unary elementwise kernel with fused post-ops.

use super::{apply_binary, apply_unary, f32_elements, KernelBuilder};
use crate::error::PassError;
use cinnabar_core::{
    ExecutableKernel, KernelError, MemoryHandle, OpKind, OpNode, PostOp, Stream, SubgraphIr,
};

use std::sync::Arc;

/// Builds [`UnaryKernel`] instances for f32 unary nodes.
pub struct UnaryBuilder;

impl KernelBuilder for UnaryBuilder {
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

        Ok(Arc::new(UnaryKernel {
            name: format!("cpu_{}_f32", node.kind.to_string().to_lowercase()),
            kind: node.kind,
            post_ops: node.post_ops.clone(),
            len,
        }))
    }
}

/// Elementwise unary compute. Src0 may alias dst.
pub struct UnaryKernel {
    name: String,
    kind: OpKind,
    post_ops: Vec<PostOp>,
    len: usize,
}

impl ExecutableKernel for UnaryKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _stream: &dyn Stream, args: &[MemoryHandle]) -> Result<(), KernelError> {
        let binary_post_ops = self
            .post_ops
            .iter()
            .filter(|p| matches!(p, PostOp::Binary(_)))
            .count();
        let expected = 1 + binary_post_ops + 1;
        if args.len() != expected {
            return Err(KernelError::new(
                &self.name,
                format!("expected {expected} arguments, got {}", args.len()),
            ));
        }

        let src = f32_elements(&args[0], self.len, &self.name)?;
        let mut extras = Vec::with_capacity(binary_post_ops);
        for arg in &args[1..args.len() - 1] {
            extras.push(f32_elements(arg, self.len, &self.name)?);
        }
        let dst = f32_elements(&args[args.len() - 1], self.len, &self.name)?;

        unsafe {
            for i in 0..self.len {
                let mut acc = apply_unary(self.kind, *src.add(i));
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
