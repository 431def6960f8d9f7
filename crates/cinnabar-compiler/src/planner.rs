//! Compile-time memory planning.
//!
//! The planner walks the scheduled node order once to compute tensor
//! liveness, resolves safe in-place pairs, and packs what remains:
//!
//! - Compile-time constants go to the persistent internal arena, laid out
//!   back to back. Their bytes are copied in when an args set is
//!   instantiated and never rebound afterwards.
//! - Runtime temporaries go to the per-call scratchpad arena via greedy
//!   interval packing: two temporaries share offsets only if their live
//!   ranges are disjoint (or they form an in-place pair).
//!
//! All iteration orders are derived from the schedule and tensor ids, never
//! from hash-map order, so the same subgraph always yields the same plan.

use crate::error::PassError;
use cinnabar_core::plan::align_up;
use cinnabar_core::{ArgSlot, MemoryPlan, SubgraphIr, TensorId};

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Produce the memory plan for a scheduled subgraph.
///
/// Requires shapes, types, and layouts to be concrete on every referenced
/// tensor.
pub fn plan_memory(ir: &SubgraphIr) -> Result<MemoryPlan, PassError> {
    let liveness = Liveness::compute(ir)?;
    let mut plan = MemoryPlan::new();

    // Externals alias caller handles; no packing needed.
    for (index, &t) in ir.inputs.iter().enumerate() {
        plan.assign(t, ArgSlot::ExternalInput(index));
    }
    for (index, &t) in ir.outputs.iter().enumerate() {
        plan.assign(t, ArgSlot::ExternalOutput(index));
    }

    let mut constants = Vec::new();
    let mut transients = Vec::new();
    for &t in liveness.intervals.keys() {
        if ir.inputs.contains(&t) || ir.outputs.contains(&t) {
            continue;
        }
        if ir.tensor(t)?.is_constant() {
            constants.push(t);
        } else {
            transients.push(t);
        }
    }

    plan.arena_size = pack_constants(ir, &constants, &mut plan)?;

    let aliases = resolve_inplace(ir, &liveness, &transients, &mut plan)?;
    plan.scratchpad_size = pack_scratchpad(ir, &liveness, &transients, &aliases, &mut plan)?;

    debug!(
        arena = plan.arena_size,
        scratchpad = plan.scratchpad_size,
        inplace = plan.inplace_pairs.len(),
        "memory plan complete"
    );
    Ok(plan)
}

// ─────────────────────────────── Liveness ────────────────────────────────

struct Interval {
    start: usize,
    end: usize,
}

struct Liveness {
    /// Live range per referenced tensor, keyed in tensor-id order.
    intervals: BTreeMap<TensorId, Interval>,
}

impl Liveness {
    /// One walk over the schedule: a tensor is first defined at the program
    /// point of its producer (point 0 for externals and constants) and last
    /// used at its latest consumer. Declared outputs stay live to the end.
    fn compute(ir: &SubgraphIr) -> Result<Self, PassError> {
        let order = ir.topological_order();
        let mut intervals: BTreeMap<TensorId, Interval> = BTreeMap::new();

        let mut touch = |t: TensorId, point: usize, defines: bool| {
            let interval = intervals.entry(t).or_insert(Interval {
                start: if defines { point } else { 0 },
                end: point,
            });
            interval.end = interval.end.max(point);
        };

        for (point, &node_id) in order.iter().enumerate() {
            let node = ir.node(node_id)?;
            for &input in &node.inputs {
                touch(input, point, false);
            }
            for &output in &node.outputs {
                touch(output, point, true);
            }
        }

        let last_point = order.len().saturating_sub(1);
        for &output in &ir.outputs {
            if let Some(interval) = intervals.get_mut(&output) {
                interval.end = last_point;
            }
        }

        Ok(Self { intervals })
    }

    fn interval(&self, t: TensorId) -> &Interval {
        &self.intervals[&t]
    }
}

// ─────────────────────────────── Constants ───────────────────────────────

fn pack_constants(
    ir: &SubgraphIr,
    constants: &[TensorId],
    plan: &mut MemoryPlan,
) -> Result<usize, PassError> {
    let mut cursor = 0usize;
    for &t in constants {
        let size = tensor_size(ir, t)?;
        plan.assign(t, ArgSlot::Internal { offset: cursor, size });
        cursor += align_up(size);
    }
    Ok(cursor)
}

// ─────────────────────────────── In-place ────────────────────────────────

/// Find (input, output) pairs that may share storage.
///
/// A transient input may alias its consumer's output when the consumer is
/// its only use, the operator reads each element before writing it, the
/// tensor sits in the src0 position, and both sides match in shape and
/// element type. The alias target must be storage the plan controls, so
/// external inputs and constants are never targets.
fn resolve_inplace(
    ir: &SubgraphIr,
    liveness: &Liveness,
    transients: &[TensorId],
    plan: &mut MemoryPlan,
) -> Result<HashMap<TensorId, TensorId>, PassError> {
    let mut aliases = HashMap::new();

    for &t in transients {
        let [consumer] = ir.tensor_consumers(t) else {
            continue;
        };
        let node = ir.node(*consumer)?;
        if !node.kind.is_inplace_capable() {
            continue;
        }
        if node.inputs.first() != Some(&t) {
            continue;
        }
        let [dst] = node.outputs[..] else {
            continue;
        };
        if ir.inputs.contains(&dst) || ir.tensor(dst)?.is_constant() {
            continue;
        }

        let src_tensor = ir.tensor(t)?;
        let dst_tensor = ir.tensor(dst)?;
        if src_tensor.shape != dst_tensor.shape || src_tensor.dtype != dst_tensor.dtype {
            continue;
        }

        // A dst already read by an earlier point would be clobbered.
        if liveness.interval(dst).start < liveness.interval(t).end {
            continue;
        }

        aliases.insert(t, dst);
        plan.inplace_pairs.push((t, dst));
    }

    Ok(aliases)
}

fn alias_root(aliases: &HashMap<TensorId, TensorId>, mut t: TensorId) -> TensorId {
    while let Some(&next) = aliases.get(&t) {
        t = next;
    }
    t
}

// ────────────────────────── Scratchpad packing ───────────────────────────

struct Group {
    root: TensorId,
    members: Vec<TensorId>,
    start: usize,
    end: usize,
    size: usize,
}

/// Greedy interval packing: place each group at the lowest aligned offset
/// that does not collide with an already placed group whose live range
/// overlaps.
fn pack_scratchpad(
    ir: &SubgraphIr,
    liveness: &Liveness,
    transients: &[TensorId],
    aliases: &HashMap<TensorId, TensorId>,
    plan: &mut MemoryPlan,
) -> Result<usize, PassError> {
    // Alias groups share one slot; members chained into an external output
    // alias the caller's handle instead and need no scratchpad space.
    let mut groups: BTreeMap<TensorId, Group> = BTreeMap::new();
    for &t in transients {
        let root = alias_root(aliases, t);
        let interval = liveness.interval(t);

        if ir.outputs.contains(&root) {
            let index = ir.outputs.iter().position(|&o| o == root).unwrap_or(0);
            plan.assign(t, ArgSlot::ExternalOutput(index));
            continue;
        }

        let size = tensor_size(ir, t)?;
        let group = groups.entry(root).or_insert(Group {
            root,
            members: Vec::new(),
            start: usize::MAX,
            end: 0,
            size: 0,
        });
        group.members.push(t);
        group.start = group.start.min(interval.start);
        group.end = group.end.max(interval.end);
        group.size = group.size.max(size);
    }

    let mut ordered: Vec<Group> = groups.into_values().collect();
    ordered.sort_by_key(|g| (g.start, g.root));

    let mut placed: Vec<(usize, usize, usize, usize)> = Vec::new(); // offset, size, start, end
    let mut total = 0usize;
    for group in &ordered {
        let size = align_up(group.size);

        let mut busy: Vec<(usize, usize)> = placed
            .iter()
            .filter(|&&(_, _, start, end)| start <= group.end && group.start <= end)
            .map(|&(offset, size, _, _)| (offset, size))
            .collect();
        busy.sort_unstable();

        let mut offset = 0usize;
        for (busy_offset, busy_size) in busy {
            if offset + size <= busy_offset {
                break;
            }
            offset = offset.max(busy_offset + busy_size);
        }

        placed.push((offset, size, group.start, group.end));
        total = total.max(offset + size);

        for &member in &group.members {
            let member_size = tensor_size(ir, member)?;
            plan.assign(
                member,
                ArgSlot::Scratchpad {
                    offset,
                    size: member_size,
                },
            );
        }
    }

    Ok(total)
}

fn tensor_size(ir: &SubgraphIr, t: TensorId) -> Result<usize, PassError> {
    let tensor = ir.tensor(t)?;
    tensor.size_bytes().ok_or_else(|| {
        PassError::Plan(format!(
            "tensor '{}' reached planning without a static shape",
            tensor.name
        ))
    })
}
