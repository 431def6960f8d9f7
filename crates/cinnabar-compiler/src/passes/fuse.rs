//! Post-operation fusion.

use crate::error::PassError;
use cinnabar_core::{OpKind, OpNodeId, PostOp, SubgraphIr, TensorId};
use tracing::debug;

/// Which follow-on operators may be folded into a preceding compute node.
///
/// Fusion legality is data, not code: the allow-list is consulted per
/// candidate, so callers can widen or narrow it without touching the pass.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    fusible: Vec<OpKind>,
}

impl FusionConfig {
    /// Config with the given fusible operator kinds.
    pub fn new(fusible: Vec<OpKind>) -> Self {
        Self { fusible }
    }

    /// Config that fuses nothing.
    pub fn disabled() -> Self {
        Self { fusible: Vec::new() }
    }

    /// Whether `kind` may be folded as a post-op.
    pub fn is_fusible(&self, kind: OpKind) -> bool {
        self.fusible.contains(&kind)
    }
}

impl Default for FusionConfig {
    /// The stock allow-list: bias-style adds and the common activations.
    fn default() -> Self {
        Self::new(vec![OpKind::Add, OpKind::Relu, OpKind::Sigmoid])
    }
}

/// Fold eligible follow-on operators into their producer as post-ops.
///
/// A candidate pair is `producer -> consumer` where the intermediate tensor
/// is internal, not a declared output, and used exactly once. The consumer's
/// kind must be on the allow-list; binary consumers additionally need their
/// extra operand to already match the intermediate's shape, and
/// non-commutative binary consumers must have the intermediate as src0.
/// Runs to a fixed point so whole chains collapse into one node.
pub fn fuse_post_ops(
    mut ir: SubgraphIr,
    config: &FusionConfig,
) -> Result<SubgraphIr, PassError> {
    loop {
        let Some(candidate) = find_candidate(&ir, config)? else {
            break;
        };

        let consumer = ir.remove_node(candidate.consumer)?;
        let mut fused = ir.remove_node(candidate.producer)?;
        debug!(
            producer = fused.name.as_str(),
            consumer = consumer.name.as_str(),
            "fusing post-op"
        );

        match candidate.extra {
            None => fused.post_ops.push(PostOp::Eltwise(consumer.kind)),
            Some(extra) => {
                fused.post_ops.push(PostOp::Binary(consumer.kind));
                fused.inputs.push(extra);
            }
        }
        fused.outputs = consumer.outputs;
        ir.add_node(fused);
    }

    Ok(ir)
}

struct Candidate {
    producer: OpNodeId,
    consumer: OpNodeId,
    /// Extra operand of a binary post-op; `None` for eltwise post-ops.
    extra: Option<TensorId>,
}

fn find_candidate(
    ir: &SubgraphIr,
    config: &FusionConfig,
) -> Result<Option<Candidate>, PassError> {
    for (producer_id, producer) in ir.nodes() {
        if !producer.kind.is_binary() && !producer.kind.is_unary() {
            continue;
        }

        let intermediate = producer.outputs[0];
        if ir.outputs.contains(&intermediate) {
            continue;
        }
        let [consumer_id] = ir.tensor_consumers(intermediate) else {
            continue;
        };
        let consumer = ir.node(*consumer_id)?;
        if !config.is_fusible(consumer.kind) || !consumer.post_ops.is_empty() {
            continue;
        }

        if consumer.kind.is_unary() {
            return Ok(Some(Candidate {
                producer: producer_id,
                consumer: *consumer_id,
                extra: None,
            }));
        }
        if consumer.kind.is_binary() {
            if let Some(extra) = binary_extra(ir, consumer, intermediate)? {
                return Ok(Some(Candidate {
                    producer: producer_id,
                    consumer: *consumer_id,
                    extra: Some(extra),
                }));
            }
        }
    }
    Ok(None)
}

/// Binary post-ops are applied elementwise against the accumulator, so the
/// extra operand must already have the fused output's shape, and the
/// intermediate must sit where the accumulator sits.
fn binary_extra(
    ir: &SubgraphIr,
    consumer: &cinnabar_core::OpNode,
    intermediate: TensorId,
) -> Result<Option<TensorId>, PassError> {
    let [a, b] = consumer.inputs[..] else {
        return Ok(None);
    };
    let extra = if a == intermediate && b != intermediate {
        b
    } else if b == intermediate && a != intermediate && consumer.kind.is_commutative() {
        a
    } else {
        return Ok(None);
    };

    let intermediate_shape = &ir.tensor(intermediate)?.shape;
    if ir.tensor(extra)?.shape == *intermediate_shape {
        Ok(Some(extra))
    } else {
        Ok(None)
    }
}
