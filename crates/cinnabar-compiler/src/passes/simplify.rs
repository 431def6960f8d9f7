//! Algebraic simplification of recognizable operator chains.

use crate::error::PassError;
use cinnabar_core::{OpKind, OpNode, OpNodeId, SubgraphIr, TensorId};
use tracing::debug;

/// Replace recognizable chains with cheaper equivalents:
///
/// - `Mul(a, Reciprocal(x))` becomes `Div(a, x)`
/// - `Mul(x, Sigmoid(x))` becomes `Swish(x)`
///
/// The intermediate tensor must be internal, must not be a declared output,
/// and must have the `Mul` as its only use; otherwise the chain is left
/// alone. Runs to a fixed point so chains exposed by one rewrite are picked
/// up by the next sweep.
pub fn simplify_algebra(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    loop {
        let Some(rewrite) = find_rewrite(&ir)? else {
            break;
        };

        match rewrite {
            Rewrite::ReciprocalMul {
                reciprocal,
                mul,
                numerator,
            } => {
                let recip_node = ir.remove_node(reciprocal)?;
                let mul_node = ir.remove_node(mul)?;
                debug!(name = mul_node.name.as_str(), "folding Mul(Reciprocal) to Div");
                ir.add_node(
                    OpNode::new(OpKind::Div)
                        .named(&mul_node.name)
                        .with_inputs(vec![numerator, recip_node.inputs[0]])
                        .with_outputs(mul_node.outputs),
                );
            }
            Rewrite::SigmoidMul { sigmoid, mul } => {
                let sigmoid_node = ir.remove_node(sigmoid)?;
                let mul_node = ir.remove_node(mul)?;
                debug!(name = mul_node.name.as_str(), "folding Mul(x, Sigmoid(x)) to Swish");
                ir.add_node(
                    OpNode::new(OpKind::Swish)
                        .named(&mul_node.name)
                        .with_inputs(vec![sigmoid_node.inputs[0]])
                        .with_outputs(mul_node.outputs),
                );
            }
        }
    }

    Ok(ir)
}

enum Rewrite {
    ReciprocalMul {
        reciprocal: OpNodeId,
        mul: OpNodeId,
        numerator: TensorId,
    },
    SigmoidMul {
        sigmoid: OpNodeId,
        mul: OpNodeId,
    },
}

fn find_rewrite(ir: &SubgraphIr) -> Result<Option<Rewrite>, PassError> {
    for (id, node) in ir.nodes() {
        let Some(&result) = node.outputs.first() else {
            continue;
        };
        let Some((mul_id, mul)) = sole_mul_consumer(ir, result)? else {
            continue;
        };

        match node.kind {
            OpKind::Reciprocal => {
                // Mul(r, r) is a genuine square, not a division.
                let Some(numerator) = other_operand(&mul.inputs, result) else {
                    continue;
                };
                return Ok(Some(Rewrite::ReciprocalMul {
                    reciprocal: id,
                    mul: mul_id,
                    numerator,
                }));
            }
            OpKind::Sigmoid => {
                // The other Mul operand must be the Sigmoid's own input.
                if other_operand(&mul.inputs, result) != Some(node.inputs[0]) {
                    continue;
                }
                return Ok(Some(Rewrite::SigmoidMul {
                    sigmoid: id,
                    mul: mul_id,
                }));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// The chain's intermediate must feed exactly one Mul and nothing else.
fn sole_mul_consumer<'a>(
    ir: &'a SubgraphIr,
    tensor: TensorId,
) -> Result<Option<(OpNodeId, &'a OpNode)>, PassError> {
    if ir.outputs.contains(&tensor) {
        return Ok(None);
    }
    let [consumer] = ir.tensor_consumers(tensor) else {
        return Ok(None);
    };
    let node = ir.node(*consumer)?;
    if node.kind == OpKind::Mul && node.post_ops.is_empty() {
        Ok(Some((*consumer, node)))
    } else {
        Ok(None)
    }
}

fn other_operand(inputs: &[TensorId], tensor: TensorId) -> Option<TensorId> {
    match inputs {
        [a, b] if *a == tensor && *b != tensor => Some(*b),
        [a, b] if *b == tensor && *a != tensor => Some(*a),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinnabar_core::{DataType, LogicalTensor, TensorRole, TensorShape};

    fn tensor(name: &str, role: TensorRole) -> LogicalTensor {
        LogicalTensor::new(
            name.to_string(),
            DataType::F32,
            TensorShape::Static(vec![4]),
            role,
        )
    }

    #[test]
    fn test_reciprocal_mul_becomes_div() {
        let mut ir = SubgraphIr::new();
        let a = ir.add_tensor(tensor("a", TensorRole::Input));
        let x = ir.add_tensor(tensor("x", TensorRole::Input));
        let r = ir.add_tensor(tensor("r", TensorRole::Internal));
        let y = ir.add_tensor(tensor("y", TensorRole::Output));
        ir.inputs = vec![a, x];
        ir.outputs = vec![y];
        ir.add_node(
            OpNode::new(OpKind::Reciprocal)
                .named("recip")
                .with_inputs(vec![x])
                .with_outputs(vec![r]),
        );
        ir.add_node(
            OpNode::new(OpKind::Mul)
                .named("scale")
                .with_inputs(vec![a, r])
                .with_outputs(vec![y]),
        );

        let ir = simplify_algebra(ir).unwrap();

        assert_eq!(ir.node_count(), 1);
        let (_, div) = ir.nodes().next().unwrap();
        assert_eq!(div.kind, OpKind::Div);
        assert_eq!(div.inputs, vec![a, x]);
        assert_eq!(div.outputs, vec![y]);
    }

    #[test]
    fn test_sigmoid_mul_becomes_swish() {
        let mut ir = SubgraphIr::new();
        let x = ir.add_tensor(tensor("x", TensorRole::Input));
        let s = ir.add_tensor(tensor("s", TensorRole::Internal));
        let y = ir.add_tensor(tensor("y", TensorRole::Output));
        ir.inputs = vec![x];
        ir.outputs = vec![y];
        ir.add_node(
            OpNode::new(OpKind::Sigmoid)
                .named("gate")
                .with_inputs(vec![x])
                .with_outputs(vec![s]),
        );
        ir.add_node(
            OpNode::new(OpKind::Mul)
                .named("swish")
                .with_inputs(vec![x, s])
                .with_outputs(vec![y]),
        );

        let ir = simplify_algebra(ir).unwrap();

        assert_eq!(ir.node_count(), 1);
        let (_, swish) = ir.nodes().next().unwrap();
        assert_eq!(swish.kind, OpKind::Swish);
        assert_eq!(swish.inputs, vec![x]);
    }

    #[test]
    fn test_multi_use_intermediate_is_left_alone() {
        let mut ir = SubgraphIr::new();
        let x = ir.add_tensor(tensor("x", TensorRole::Input));
        let s = ir.add_tensor(tensor("s", TensorRole::Internal));
        let y = ir.add_tensor(tensor("y", TensorRole::Output));
        let z = ir.add_tensor(tensor("z", TensorRole::Output));
        ir.inputs = vec![x];
        ir.outputs = vec![y, z];
        ir.add_node(
            OpNode::new(OpKind::Sigmoid)
                .with_inputs(vec![x])
                .with_outputs(vec![s]),
        );
        ir.add_node(
            OpNode::new(OpKind::Mul)
                .with_inputs(vec![x, s])
                .with_outputs(vec![y]),
        );
        ir.add_node(
            OpNode::new(OpKind::Relu)
                .with_inputs(vec![s])
                .with_outputs(vec![z]),
        );

        let ir = simplify_algebra(ir).unwrap();
        assert_eq!(ir.node_count(), 3);
    }

    #[test]
    fn test_sigmoid_of_different_tensor_is_left_alone() {
        let mut ir = SubgraphIr::new();
        let a = ir.add_tensor(tensor("a", TensorRole::Input));
        let x = ir.add_tensor(tensor("x", TensorRole::Input));
        let s = ir.add_tensor(tensor("s", TensorRole::Internal));
        let y = ir.add_tensor(tensor("y", TensorRole::Output));
        ir.inputs = vec![a, x];
        ir.outputs = vec![y];
        ir.add_node(
            OpNode::new(OpKind::Sigmoid)
                .with_inputs(vec![x])
                .with_outputs(vec![s]),
        );
        ir.add_node(
            OpNode::new(OpKind::Mul)
                .with_inputs(vec![a, s])
                .with_outputs(vec![y]),
        );

        let ir = simplify_algebra(ir).unwrap();
        assert_eq!(ir.node_count(), 2);
    }
}
