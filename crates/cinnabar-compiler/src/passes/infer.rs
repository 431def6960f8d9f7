//! Shape and type inference.
//!
//! Both passes walk the graph in topological order and propagate metadata
//! from inputs to outputs. They run multiple times in the pipeline because
//! rewrites (lowering, canonicalization, fusion) introduce tensors with
//! `Unknown` shape or `Undefined` dtype.

use crate::error::PassError;
use cinnabar_core::{broadcast_shape, DataType, OpKind, SubgraphIr, TensorId, TensorShape};

/// Infer every tensor's static shape.
///
/// External inputs and constants arrive with static shapes; everything else
/// is derived per node kind. A tensor that already carries a static shape is
/// checked, not overwritten; a contradiction fails the pass.
pub fn infer_shapes(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    for node_id in ir.topological_order() {
        let node = ir.node(node_id)?.clone();

        let derived: Vec<usize> = if node.kind.is_binary() {
            let a = known_dims(&ir, node.inputs[0])?;
            let b = known_dims(&ir, node.inputs[1])?;
            broadcast_shape(&a, &b)?
        } else if node.kind.is_unary() {
            known_dims(&ir, node.inputs[0])?
        } else {
            match node.kind {
                OpKind::Broadcast => attr_shape(&ir, node_id)?,
                OpKind::SquaredDifference => {
                    let a = known_dims(&ir, node.inputs[0])?;
                    let b = known_dims(&ir, node.inputs[1])?;
                    broadcast_shape(&a, &b)?
                }
                kind => {
                    return Err(PassError::ShapeContradiction(format!(
                        "no shape rule for operator {kind}"
                    )))
                }
            }
        };

        // Binary post-op operands must match the fused output elementwise.
        for &extra in node.inputs.iter().skip(node.kind.data_input_count()) {
            let dims = known_dims(&ir, extra)?;
            if dims != derived {
                return Err(PassError::ShapeContradiction(format!(
                    "post-op operand '{}' has shape {:?}, fused output needs {:?}",
                    ir.tensor(extra)?.name,
                    dims,
                    derived
                )));
            }
        }

        let output = ir.tensor_mut(node.outputs[0])?;
        match &output.shape {
            TensorShape::Unknown => output.shape = TensorShape::Static(derived),
            TensorShape::Static(dims) if *dims == derived => {}
            TensorShape::Static(dims) => {
                return Err(PassError::ShapeContradiction(format!(
                    "tensor '{}' declared with shape {:?} but inferred {:?}",
                    output.name, dims, derived
                )))
            }
        }
    }

    Ok(ir)
}

/// Infer every tensor's element type.
///
/// Operators are type-preserving: all data inputs must agree, and the output
/// takes their type. Declared output types are checked against the inferred
/// type.
pub fn infer_types(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    for node_id in ir.topological_order() {
        let node = ir.node(node_id)?.clone();

        let mut dtype = DataType::Undefined;
        for &input in &node.inputs {
            let t = ir.tensor(input)?;
            match (dtype, t.dtype) {
                (_, DataType::Undefined) => {
                    return Err(PassError::TypeContradiction(format!(
                        "input '{}' of node '{}' has no element type",
                        t.name, node.name
                    )))
                }
                (DataType::Undefined, found) => dtype = found,
                (expected, found) if expected == found => {}
                (expected, found) => {
                    return Err(PassError::TypeContradiction(format!(
                        "node '{}' mixes element types {expected:?} and {found:?}",
                        node.name
                    )))
                }
            }
        }

        let output = ir.tensor_mut(node.outputs[0])?;
        if output.dtype == DataType::Undefined {
            output.dtype = dtype;
        } else if output.dtype != dtype {
            return Err(PassError::TypeContradiction(format!(
                "tensor '{}' declared as {:?} but inferred {:?}",
                output.name, output.dtype, dtype
            )));
        }
    }

    Ok(ir)
}

fn known_dims(ir: &SubgraphIr, tensor: TensorId) -> Result<Vec<usize>, PassError> {
    let t = ir.tensor(tensor)?;
    t.shape.as_static().map(<[usize]>::to_vec).ok_or_else(|| {
        PassError::ShapeContradiction(format!("tensor '{}' has no inferred shape", t.name))
    })
}

fn attr_shape(ir: &SubgraphIr, node_id: cinnabar_core::OpNodeId) -> Result<Vec<usize>, PassError> {
    let node = ir.node(node_id)?;
    let dims = node
        .get_attribute("shape")
        .and_then(|attr| attr.as_ints())
        .ok_or_else(|| {
            PassError::ShapeContradiction(format!(
                "Broadcast node '{}' is missing its shape attribute",
                node.name
            ))
        })?;
    Ok(dims.iter().map(|&d| d as usize).collect())
}
