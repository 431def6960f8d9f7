//! The Cinnabar partition compiler.
//!
//! Takes a validated [`SubgraphIr`], runs the ordered pass pipeline over it
//! (lowering, simplification, inference, canonicalization, fusion, layout
//! propagation, memory planning, kernel resolution) and freezes the result
//! into an immutable [`CompiledPartition`] ready for repeated execution.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cinnabar_compiler::{compile, CompileOptions};
//! # fn demo(
//! #     ir: cinnabar_core::SubgraphIr,
//! #     engine: &dyn cinnabar_core::Engine,
//! #     allocator: Arc<dyn cinnabar_core::Allocator>,
//! # ) -> Result<(), cinnabar_compiler::CompileError> {
//! let partition = compile(ir, engine, allocator, CompileOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kernels;
pub mod passes;
pub mod pipeline;
pub mod planner;

pub use error::{CompileError, PassError, Result};
pub use passes::FusionConfig;
pub use pipeline::PassPipeline;

use cinnabar_core::{
    ArgSlot, Allocator, CompiledPartition, DataType, Engine, ExecutionArgsSet, MemoryPlan,
    PartitionId, SubgraphIr, TensorRole, TensorShape,
};
use kernels::KernelRegistry;

use std::cell::RefCell;
use std::sync::Arc;
use tracing::info;

/// Knobs for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Which follow-on operators post-op fusion may fold.
    pub fusion: FusionConfig,
}

/// Compile one partition subgraph into an executable artifact.
///
/// Runs the full pass pipeline and freezes the outcome. The returned
/// partition is immutable, safe to share across threads, and owns its
/// resource-cache identity: dropping it evicts every cached args set.
///
/// # Errors
///
/// - [`CompileError::InvalidPartition`] if the subgraph's structure is broken
/// - [`CompileError::ExternalMismatch`] if the declared inputs/outputs do
///   not match the graph
/// - [`CompileError::UnsupportedEngine`] / [`CompileError::UnsupportedOperator`]
///   if no kernel exists for the target
/// - [`CompileError::Pass`] wrapping the failing pass otherwise
#[tracing::instrument(skip_all, fields(nodes = ir.node_count()))]
pub fn compile(
    ir: SubgraphIr,
    engine: &dyn Engine,
    allocator: Arc<dyn Allocator>,
    options: CompileOptions,
) -> Result<CompiledPartition> {
    let id = PartitionId::next();

    ir.validate().map_err(CompileError::InvalidPartition)?;
    validate_externals(&ir)?;

    let registry = KernelRegistry::for_engine(engine)
        .ok_or_else(|| CompileError::UnsupportedEngine(engine.kind().to_string()))?;

    let plan_cell: RefCell<Option<MemoryPlan>> = RefCell::new(None);
    let invocations_cell = RefCell::new(Vec::new());

    let ir = {
        let mut pipeline = PassPipeline::new();
        pipeline.set_visualizer(|ir, stage| {
            tracing::trace!(stage, nodes = ir.node_count(), tensors = ir.tensor_count(), "ir");
            Ok(())
        });
        pipeline.add_pass("lower_composites", passes::lower_composites);
        pipeline.add_pass("simplify_algebra", passes::simplify_algebra);
        pipeline.add_pass("infer_shapes", passes::infer_shapes);
        pipeline.add_pass("canonicalize_broadcasts", passes::canonicalize_broadcasts);
        pipeline.add_pass("canonicalize_operand_order", passes::canonicalize_operand_order);
        pipeline.add_pass("infer_shapes_post_canonicalize", passes::infer_shapes);
        pipeline.add_pass("fuse_post_ops", |ir| {
            passes::fuse_post_ops(ir, &options.fusion)
        });
        pipeline.add_pass("infer_shapes_post_fusion", passes::infer_shapes);
        pipeline.add_pass("infer_types", passes::infer_types);
        pipeline.add_pass("propagate_layouts", passes::propagate_layouts);
        pipeline.add_pass("plan_memory", |ir| {
            *plan_cell.borrow_mut() = Some(planner::plan_memory(&ir)?);
            Ok(ir)
        });
        pipeline.add_pass("compile_kernels", |ir| {
            let plan_ref = plan_cell.borrow();
            let plan = plan_ref
                .as_ref()
                .ok_or_else(|| PassError::Plan("memory planning has not run".to_string()))?;
            *invocations_cell.borrow_mut() = kernels::compile_invocations(&ir, plan, &registry)?;
            Ok(ir)
        });

        pipeline.run(ir, id).map_err(|err| match err {
            CompileError::Pass {
                partition,
                source: PassError::Unsupported { kind, dtype },
                ..
            } => CompileError::UnsupportedOperator {
                partition,
                kind,
                dtype,
            },
            other => other,
        })?
    };

    let plan = plan_cell.into_inner().ok_or_else(|| CompileError::Pass {
        pass: "plan_memory".to_string(),
        partition: id.raw(),
        source: PassError::Plan("planner produced no plan".to_string()),
    })?;
    let invocations = invocations_cell.into_inner();

    let mut template = ExecutionArgsSet::new();
    for invocation in &invocations {
        template.push_invocation(&invocation.bindings);
    }

    let constants = constant_image(&ir, &plan)?;
    let input_types = external_types(&ir, &ir.inputs)?;
    let output_types = external_types(&ir, &ir.outputs)?;

    info!(
        partition = id.raw(),
        invocations = invocations.len(),
        arena = plan.arena_size,
        scratchpad = plan.scratchpad_size,
        "partition compiled"
    );

    Ok(CompiledPartition::new(
        id,
        invocations,
        plan,
        input_types,
        output_types,
        template,
        constants,
        allocator,
    ))
}

/// Check the declared partition boundary against the graph.
fn validate_externals(ir: &SubgraphIr) -> Result<()> {
    if ir.outputs.is_empty() {
        return Err(CompileError::ExternalMismatch(
            "partition declares no outputs".to_string(),
        ));
    }

    for &input in &ir.inputs {
        let tensor = ir
            .tensor(input)
            .map_err(|e| CompileError::ExternalMismatch(e.to_string()))?;
        if tensor.role != TensorRole::Input {
            return Err(CompileError::ExternalMismatch(format!(
                "declared input '{}' has role {:?}",
                tensor.name, tensor.role
            )));
        }
        if !matches!(tensor.shape, TensorShape::Static(_)) {
            return Err(CompileError::ExternalMismatch(format!(
                "declared input '{}' has no static shape",
                tensor.name
            )));
        }
        if tensor.dtype == DataType::Undefined {
            return Err(CompileError::ExternalMismatch(format!(
                "declared input '{}' has no element type",
                tensor.name
            )));
        }
        if ir.tensor_producer(input).is_some() {
            return Err(CompileError::ExternalMismatch(format!(
                "declared input '{}' is produced inside the partition",
                tensor.name
            )));
        }
    }

    for &output in &ir.outputs {
        let tensor = ir
            .tensor(output)
            .map_err(|e| CompileError::ExternalMismatch(e.to_string()))?;
        if tensor.role != TensorRole::Output {
            return Err(CompileError::ExternalMismatch(format!(
                "declared output '{}' has role {:?}",
                tensor.name, tensor.role
            )));
        }
        if ir.tensor_producer(output).is_none() {
            return Err(CompileError::ExternalMismatch(format!(
                "declared output '{}' is not produced by any node",
                tensor.name
            )));
        }
    }

    Ok(())
}

/// Collect the (arena offset, bytes) image of every planned constant, in
/// offset order.
fn constant_image(ir: &SubgraphIr, plan: &MemoryPlan) -> Result<Vec<(usize, Vec<u8>)>> {
    let mut image = Vec::new();
    for (tensor_id, slot) in plan.assignments() {
        let ArgSlot::Internal { offset, .. } = slot else {
            continue;
        };
        let tensor = ir
            .tensor(tensor_id)
            .map_err(|e| CompileError::ExternalMismatch(e.to_string()))?;
        if let Some(bytes) = tensor.constant_bytes() {
            image.push((offset, bytes.to_vec()));
        }
    }
    image.sort_by_key(|(offset, _)| *offset);
    Ok(image)
}

fn external_types(
    ir: &SubgraphIr,
    tensors: &[cinnabar_core::TensorId],
) -> Result<Vec<DataType>> {
    tensors
        .iter()
        .map(|&t| {
            ir.tensor(t)
                .map(|tensor| tensor.dtype)
                .map_err(|e| CompileError::ExternalMismatch(e.to_string()))
        })
        .collect()
}
