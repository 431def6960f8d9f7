//! Mutable subgraph IR that the pass pipeline rewrites.
//!
//! The IR is a directed graph where:
//! - **Nodes** (`OpNode`) are operators (e.g. Add, Mul, Broadcast)
//! - **Tensors** (`LogicalTensor`) flow between operators and live in a
//!   side-table indexed by `TensorId`
//!
//! petgraph edges exist solely for topological ordering; all tensor metadata
//! lives in the side-table so that tensor ids stay valid across rewrites.

use crate::op::{AttrMap, AttrValue, OpKind, PostOp};
use crate::tensor::{LogicalTensor, TensorId};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;

use std::collections::HashMap;

/// Identifier for an operator node (backed by petgraph NodeIndex).
pub type OpNodeId = NodeIndex;

// ─────────────────────────────── SubgraphIr ──────────────────────────────

/// The mutable graph representation of one partition.
///
/// Owns the operator nodes plus the declared external input/output tensor id
/// lists, in partition-definition order. Created once per compile request and
/// discarded after compilation.
#[derive(Debug)]
pub struct SubgraphIr {
    /// The graph structure (nodes only, no edge data).
    graph: StableGraph<OpNode, ()>,

    /// Tensor metadata side-table.
    tensors: Vec<LogicalTensor>,

    /// Lookup table: tensor id -> producing node id.
    producer: HashMap<TensorId, OpNodeId>,

    /// Lookup table: tensor id -> consuming node ids (one entry per use).
    consumers: HashMap<TensorId, Vec<OpNodeId>>,

    /// Declared external input tensor ids, in declaration order.
    pub inputs: Vec<TensorId>,

    /// Declared external output tensor ids, in declaration order.
    pub outputs: Vec<TensorId>,
}

impl SubgraphIr {
    /// Create a new empty subgraph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            tensors: Vec::new(),
            producer: HashMap::new(),
            consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Tensor access ──

    /// Add a tensor to the side-table and return its id.
    pub fn add_tensor(&mut self, tensor: LogicalTensor) -> TensorId {
        let id = TensorId::new(self.tensors.len());
        self.tensors.push(tensor);
        id
    }

    /// Get an immutable reference to a tensor.
    pub fn tensor(&self, id: TensorId) -> Result<&LogicalTensor> {
        self.tensors
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("tensor {:?} not found", id)))
    }

    /// Get a mutable reference to a tensor.
    pub fn tensor_mut(&mut self, id: TensorId) -> Result<&mut LogicalTensor> {
        self.tensors
            .get_mut(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("tensor {:?} not found", id)))
    }

    /// Number of tensors in the side-table.
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Get the node that produces a tensor, if any.
    pub fn tensor_producer(&self, id: TensorId) -> Option<OpNodeId> {
        self.producer.get(&id).copied()
    }

    /// Get the nodes that consume a tensor (one entry per use).
    pub fn tensor_consumers(&self, id: TensorId) -> &[OpNodeId] {
        self.consumers
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: OpNodeId) -> Result<&OpNode> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("node {:?} not found", id)))
    }

    /// Get a mutable reference to a node.
    ///
    /// Input/output lists must not be edited through this reference; use
    /// `remove_node` + `add_node` so the lookup tables stay consistent.
    pub fn node_mut(&mut self, id: OpNodeId) -> Result<&mut OpNode> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("node {:?} not found", id)))
    }

    /// Iterate over all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = (OpNodeId, &OpNode)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    // ── Graph mutation ──

    /// Add a node to the graph and return its id.
    ///
    /// Updates the producer/consumer lookup tables and adds petgraph edges
    /// for topological ordering. Also wires edges to already-present
    /// consumers of the node's outputs, so producers may be added after
    /// their consumers during rewrites.
    pub fn add_node(&mut self, node: OpNode) -> OpNodeId {
        let node_id = self.graph.add_node(node);
        let node = self.graph.node_weight(node_id).unwrap().clone();

        for &output_id in &node.outputs {
            self.producer.insert(output_id, node_id);
            if let Some(consumer_ids) = self.consumers.get(&output_id) {
                for &consumer_id in consumer_ids.clone().iter() {
                    self.graph.add_edge(node_id, consumer_id, ());
                }
            }
        }

        for &input_id in &node.inputs {
            self.consumers.entry(input_id).or_default().push(node_id);
            if let Some(&producer_id) = self.producer.get(&input_id) {
                self.graph.add_edge(producer_id, node_id, ());
            }
        }

        node_id
    }

    /// Remove a node from the graph.
    ///
    /// With `StableGraph`, other node ids remain valid.
    pub fn remove_node(&mut self, id: OpNodeId) -> Result<OpNode> {
        let node = self.node(id)?.clone();

        for &output_id in &node.outputs {
            self.producer.remove(&output_id);
        }
        for &input_id in &node.inputs {
            if let Some(consumer_ids) = self.consumers.get_mut(&input_id) {
                if let Some(pos) = consumer_ids.iter().position(|&c| c == id) {
                    consumer_ids.remove(pos);
                }
            }
        }

        self.graph.remove_node(id);
        Ok(node)
    }

    /// Replace a node wholesale, preserving no identity.
    ///
    /// Convenience for rewrites: removes `id` and inserts `replacement`.
    pub fn replace_node(&mut self, id: OpNodeId, replacement: OpNode) -> Result<OpNodeId> {
        self.remove_node(id)?;
        Ok(self.add_node(replacement))
    }

    // ── Graph queries ──

    /// Topological order of nodes: every node appears after the producers of
    /// all its inputs.
    pub fn topological_order(&self) -> Vec<OpNodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            if self.graph.node_weight(id).is_some() {
                order.push(id);
            }
        }

        order
    }

    /// Check the structural invariants of the partition.
    ///
    /// Every node must carry its kind's operand count and exactly one
    /// output, every tensor referenced as a node input must be produced by
    /// exactly one node or be a declared external input, and the
    /// producer/consumer relation must be acyclic.
    pub fn validate(&self) -> Result<()> {
        for (_, node) in self.nodes() {
            if node.inputs.len() < node.kind.data_input_count() {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' ({:?}) has {} inputs, expected at least {}",
                    node.name,
                    node.kind,
                    node.inputs.len(),
                    node.kind.data_input_count()
                )));
            }
            if node.outputs.len() != 1 {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' ({:?}) has {} outputs, expected exactly 1",
                    node.name,
                    node.kind,
                    node.outputs.len()
                )));
            }
            for &input_id in &node.inputs {
                let tensor = self.tensor(input_id)?;
                let has_producer = self.producer.contains_key(&input_id);
                let is_external = self.inputs.contains(&input_id);
                let is_constant = tensor.is_constant();
                if !has_producer && !is_external && !is_constant {
                    return Err(Error::InvalidGraph(format!(
                        "tensor '{}' is consumed but has no producer and is not \
                         a declared external input",
                        tensor.name
                    )));
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(Error::InvalidGraph(
                "partition contains a producer/consumer cycle".to_string(),
            ));
        }

        if self.topological_order().len() != self.graph.node_count() {
            return Err(Error::InvalidGraph(
                "topological sort did not visit all nodes".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SubgraphIr {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── OpNode ─────────────────────────────────

/// An operator node: kind tag, ordered tensor id lists, attributes, and any
/// post-operations folded in by fusion.
#[derive(Debug, Clone)]
pub struct OpNode {
    /// Node name (may be empty).
    pub name: String,

    /// Operator kind tag.
    pub kind: OpKind,

    /// Input tensor ids.
    pub inputs: Vec<TensorId>,

    /// Output tensor ids.
    pub outputs: Vec<TensorId>,

    /// Operator-specific attributes.
    pub attributes: AttrMap,

    /// Fused post-operations, applied in order to each output element.
    pub post_ops: Vec<PostOp>,
}

impl OpNode {
    /// Create a new operator node with no connections.
    pub fn new(kind: OpKind) -> Self {
        Self {
            name: String::new(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: AttrMap::new(),
            post_ops: Vec::new(),
        }
    }

    /// Builder-style: set the node name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Builder-style: set the input tensor ids.
    pub fn with_inputs(mut self, inputs: Vec<TensorId>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Builder-style: set the output tensor ids.
    pub fn with_outputs(mut self, outputs: Vec<TensorId>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, key: &str, value: AttrValue) {
        self.attributes.insert(key.to_string(), value);
    }

    /// Get an attribute.
    pub fn get_attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorRole;
    use crate::types::{DataType, TensorShape};

    fn runtime_tensor(name: &str, dims: &[usize], role: TensorRole) -> LogicalTensor {
        LogicalTensor::new(
            name.to_string(),
            DataType::F32,
            TensorShape::Static(dims.to_vec()),
            role,
        )
    }

    #[test]
    fn test_create_empty_graph() {
        let ir = SubgraphIr::new();
        assert_eq!(ir.node_count(), 0);
        assert_eq!(ir.tensor_count(), 0);
    }

    #[test]
    fn test_add_node_wires_lookup_tables() {
        let mut ir = SubgraphIr::new();
        let a = ir.add_tensor(runtime_tensor("a", &[2], TensorRole::Input));
        let b = ir.add_tensor(runtime_tensor("b", &[2], TensorRole::Internal));

        let node_id = ir.add_node(OpNode::new(OpKind::Sigmoid).with_inputs(vec![a]).with_outputs(vec![b]));

        assert_eq!(ir.node_count(), 1);
        assert_eq!(ir.tensor_producer(b), Some(node_id));
        assert_eq!(ir.tensor_consumers(a), &[node_id]);
    }

    #[test]
    fn test_remove_node_cleans_lookup_tables() {
        let mut ir = SubgraphIr::new();
        let a = ir.add_tensor(runtime_tensor("a", &[2], TensorRole::Input));
        let b = ir.add_tensor(runtime_tensor("b", &[2], TensorRole::Internal));
        let node_id = ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![a]).with_outputs(vec![b]));

        ir.remove_node(node_id).unwrap();

        assert_eq!(ir.node_count(), 0);
        assert_eq!(ir.tensor_producer(b), None);
        assert!(ir.tensor_consumers(a).is_empty());
    }

    #[test]
    fn test_topological_order() {
        let mut ir = SubgraphIr::new();
        let t0 = ir.add_tensor(runtime_tensor("t0", &[2], TensorRole::Input));
        let t1 = ir.add_tensor(runtime_tensor("t1", &[2], TensorRole::Internal));
        let t2 = ir.add_tensor(runtime_tensor("t2", &[2], TensorRole::Output));

        let id_a = ir.add_node(OpNode::new(OpKind::Sigmoid).with_inputs(vec![t0]).with_outputs(vec![t1]));
        let id_b = ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![t1]).with_outputs(vec![t2]));

        assert_eq!(ir.topological_order(), vec![id_a, id_b]);
    }

    #[test]
    fn test_producer_added_after_consumer() {
        // Rewrites may insert a producer for a tensor whose consumer already
        // exists; topological order must still put the producer first.
        let mut ir = SubgraphIr::new();
        let t0 = ir.add_tensor(runtime_tensor("t0", &[2], TensorRole::Input));
        let t1 = ir.add_tensor(runtime_tensor("t1", &[2], TensorRole::Internal));
        let t2 = ir.add_tensor(runtime_tensor("t2", &[2], TensorRole::Output));

        let consumer = ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![t1]).with_outputs(vec![t2]));
        let producer = ir.add_node(OpNode::new(OpKind::Sigmoid).with_inputs(vec![t0]).with_outputs(vec![t1]));

        assert_eq!(ir.topological_order(), vec![producer, consumer]);
    }

    #[test]
    fn test_validate_rejects_unproduced_tensor() {
        let mut ir = SubgraphIr::new();
        let orphan = ir.add_tensor(runtime_tensor("orphan", &[2], TensorRole::Internal));
        let out = ir.add_tensor(runtime_tensor("out", &[2], TensorRole::Output));
        ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![orphan]).with_outputs(vec![out]));
        ir.outputs.push(out);

        assert!(ir.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_operand() {
        let mut ir = SubgraphIr::new();
        let x = ir.add_tensor(runtime_tensor("x", &[2], TensorRole::Input));
        let y = ir.add_tensor(runtime_tensor("y", &[2], TensorRole::Output));
        ir.inputs = vec![x];
        ir.outputs = vec![y];
        ir.add_node(OpNode::new(OpKind::Add).with_inputs(vec![x]).with_outputs(vec![y]));

        assert!(ir.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_output() {
        let mut ir = SubgraphIr::new();
        let x = ir.add_tensor(runtime_tensor("x", &[2], TensorRole::Input));
        ir.inputs = vec![x];
        ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![x]));

        assert!(ir.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_constant_input() {
        let mut ir = SubgraphIr::new();
        let c = ir.add_tensor(LogicalTensor::with_constant(
            "c".to_string(),
            DataType::F32,
            TensorShape::Static(vec![2]),
            vec![0u8; 8],
        ));
        let out = ir.add_tensor(runtime_tensor("out", &[2], TensorRole::Output));
        ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![c]).with_outputs(vec![out]));
        ir.outputs.push(out);

        ir.validate().unwrap();
    }

    #[test]
    fn test_debug_format() {
        // `Result<SubgraphIr, _>::unwrap_err` in pass tests needs this.
        let mut ir = SubgraphIr::new();
        let a = ir.add_tensor(runtime_tensor("a", &[2], TensorRole::Input));
        let b = ir.add_tensor(runtime_tensor("b", &[2], TensorRole::Output));
        ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![a]).with_outputs(vec![b]));

        assert!(format!("{ir:?}").contains("SubgraphIr"));
    }

    #[test]
    fn test_stable_ids_across_removal() {
        let mut ir = SubgraphIr::new();
        let t0 = ir.add_tensor(runtime_tensor("t0", &[2], TensorRole::Input));
        let t1 = ir.add_tensor(runtime_tensor("t1", &[2], TensorRole::Internal));
        let t2 = ir.add_tensor(runtime_tensor("t2", &[2], TensorRole::Internal));

        let id_a = ir.add_node(OpNode::new(OpKind::Sigmoid).with_inputs(vec![t0]).with_outputs(vec![t1]));
        let id_b = ir.add_node(OpNode::new(OpKind::Relu).with_inputs(vec![t1]).with_outputs(vec![t2]));
        let id_c = ir.add_node(OpNode::new(OpKind::Reciprocal).with_inputs(vec![t2]).with_outputs(vec![]));

        ir.remove_node(id_b).unwrap();

        assert!(ir.node(id_a).is_ok());
        assert!(ir.node(id_c).is_ok());
    }
}
