//! Broadcast and operand-order canonicalization.

use crate::error::PassError;
use cinnabar_core::{
    broadcast_shape, AttrValue, LogicalTensor, OpKind, OpNode, SubgraphIr, TensorId, TensorRole,
    TensorShape,
};

/// Make every implicit broadcast explicit.
///
/// Binary nodes whose operand shapes differ get a `Broadcast` node inserted
/// per mismatched operand, materializing it to the multidirectional result
/// shape. Downstream of this pass every binary kernel sees operands of equal
/// shape, and the planner sees the materialized intermediates as ordinary
/// internal tensors. Incompatible shapes fail the pass.
pub fn canonicalize_broadcasts(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    for node_id in ir.topological_order() {
        let node = ir.node(node_id)?.clone();
        if !node.kind.is_binary() {
            continue;
        }

        let a = static_dims(&ir, node.inputs[0])?;
        let b = static_dims(&ir, node.inputs[1])?;
        if a == b {
            continue;
        }
        let result = broadcast_shape(&a, &b)?;

        let mut rewritten = node.clone();
        for (slot, dims) in [(0usize, &a), (1usize, &b)] {
            if *dims != result {
                rewritten.inputs[slot] = insert_broadcast(&mut ir, node.inputs[slot], &result)?;
            }
        }
        ir.replace_node(node_id, rewritten)?;
    }

    Ok(ir)
}

/// Put the broadcast-materialized (or constant) operand second.
///
/// Commutative operators only; `Sub` and `Div` keep their operand order. A
/// fixed operand position lets fusion and kernel resolution treat src0 as
/// "the full-shape runtime operand" without case analysis.
pub fn canonicalize_operand_order(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    for node_id in ir.topological_order() {
        let node = ir.node(node_id)?.clone();
        if !node.kind.is_binary() || !node.kind.is_commutative() {
            continue;
        }

        let swap = (demotes(&ir, node.inputs[0])? && !demotes(&ir, node.inputs[1])?)
            .then(|| {
                let mut rewritten = node.clone();
                rewritten.inputs.swap(0, 1);
                rewritten
            });
        if let Some(rewritten) = swap {
            ir.replace_node(node_id, rewritten)?;
        }
    }

    Ok(ir)
}

/// Whether an operand prefers the second position: broadcast-materialized
/// values and compile-time constants.
fn demotes(ir: &SubgraphIr, tensor: TensorId) -> Result<bool, PassError> {
    if ir.tensor(tensor)?.is_constant() {
        return Ok(true);
    }
    let produced_by_broadcast = ir
        .tensor_producer(tensor)
        .map(|id| ir.node(id).map(|n| n.kind == OpKind::Broadcast))
        .transpose()?
        .unwrap_or(false);
    Ok(produced_by_broadcast)
}

fn insert_broadcast(
    ir: &mut SubgraphIr,
    source: TensorId,
    result: &[usize],
) -> Result<TensorId, PassError> {
    let src = ir.tensor(source)?;
    let materialized = LogicalTensor::new(
        format!("{}_bcast", src.name),
        src.dtype,
        TensorShape::Static(result.to_vec()),
        TensorRole::Internal,
    );
    let name = format!("broadcast_{}", src.name);
    let out = ir.add_tensor(materialized);

    let mut node = OpNode::new(OpKind::Broadcast)
        .named(&name)
        .with_inputs(vec![source])
        .with_outputs(vec![out]);
    node.set_attribute(
        "shape",
        AttrValue::Ints(result.iter().map(|&d| d as i64).collect()),
    );
    ir.add_node(node);
    Ok(out)
}

fn static_dims(ir: &SubgraphIr, tensor: TensorId) -> Result<Vec<usize>, PassError> {
    let t = ir.tensor(tensor)?;
    t.shape.as_static().map(<[usize]>::to_vec).ok_or_else(|| {
        PassError::ShapeContradiction(format!(
            "tensor '{}' has no inferred shape before canonicalization",
            t.name
        ))
    })
}
