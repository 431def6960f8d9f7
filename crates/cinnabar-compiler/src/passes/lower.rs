//! Lowering of composite operators to primitives.

use crate::error::PassError;
use cinnabar_core::{
    DataType, LogicalTensor, OpKind, OpNode, SubgraphIr, TensorRole, TensorShape,
};

/// Rewrite every composite operator into primitive nodes.
///
/// `SquaredDifference(a, b)` becomes `Sub(a, b) -> d; Mul(d, d)`, with a new
/// internal tensor for the difference. Later passes treat the result like any
/// other primitive chain, so the simplifier and fuser see through it.
pub fn lower_composites(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    let composites: Vec<_> = ir
        .nodes()
        .filter(|(_, node)| node.kind == OpKind::SquaredDifference)
        .map(|(id, _)| id)
        .collect();

    for id in composites {
        let node = ir.remove_node(id)?;
        let [a, b] = node.inputs[..] else {
            return Err(PassError::Graph(cinnabar_core::Error::InvalidGraph(
                format!("SquaredDifference '{}' must have two inputs", node.name),
            )));
        };
        let output = node.outputs[0];

        let diff = ir.add_tensor(LogicalTensor::new(
            format!("{}_diff", node.name),
            DataType::Undefined,
            TensorShape::Unknown,
            TensorRole::Internal,
        ));

        ir.add_node(
            OpNode::new(OpKind::Sub)
                .named(&format!("{}_sub", node.name))
                .with_inputs(vec![a, b])
                .with_outputs(vec![diff]),
        );
        ir.add_node(
            OpNode::new(OpKind::Mul)
                .named(&format!("{}_square", node.name))
                .with_inputs(vec![diff, diff])
                .with_outputs(vec![output]),
        );
    }

    Ok(ir)
}
