//! Layout propagation.

use crate::error::PassError;
use cinnabar_core::{Layout, SubgraphIr, TensorId};

/// Resolve every referenced tensor's layout to a concrete one.
///
/// The elementwise kernel set has a single layout preference: dense
/// row-major. Tensors still carrying `Any` after this pass are unreferenced
/// and are ignored by the planner. An already concrete layout (declared by
/// the caller on an external) is kept as is.
pub fn propagate_layouts(mut ir: SubgraphIr) -> Result<SubgraphIr, PassError> {
    let referenced: Vec<TensorId> = ir
        .nodes()
        .flat_map(|(_, node)| node.inputs.iter().chain(node.outputs.iter()))
        .copied()
        .collect();

    for id in referenced {
        let tensor = ir.tensor_mut(id)?;
        if tensor.layout.is_concrete() {
            continue;
        }
        let dims = tensor.shape.as_static().ok_or_else(|| {
            PassError::ShapeContradiction(format!(
                "tensor '{}' reached layout propagation without a shape",
                tensor.name
            ))
        })?;
        tensor.layout = Layout::contiguous(dims);
    }

    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinnabar_core::{DataType, LogicalTensor, OpKind, OpNode, TensorRole, TensorShape};

    #[test]
    fn test_layouts_become_concrete() {
        let mut ir = SubgraphIr::new();
        let x = ir.add_tensor(LogicalTensor::new(
            "x".to_string(),
            DataType::F32,
            TensorShape::Static(vec![2, 3, 4]),
            TensorRole::Input,
        ));
        let y = ir.add_tensor(LogicalTensor::new(
            "y".to_string(),
            DataType::F32,
            TensorShape::Static(vec![2, 3, 4]),
            TensorRole::Output,
        ));
        ir.inputs = vec![x];
        ir.outputs = vec![y];
        ir.add_node(
            OpNode::new(OpKind::Relu)
                .with_inputs(vec![x])
                .with_outputs(vec![y]),
        );

        let ir = propagate_layouts(ir).unwrap();
        assert_eq!(ir.tensor(x).unwrap().layout, Layout::Strided(vec![12, 4, 1]));
        assert_eq!(ir.tensor(y).unwrap().layout, Layout::Strided(vec![12, 4, 1]));
    }
}
