//! The execution engine: runs a compiled partition against caller buffers.

use crate::error::{ExecError, Result};
use crate::scratchpad::ScopedScratchpad;
use cinnabar_core::{CompiledPartition, MemoryHandle, ResourceCache, Stream};

use std::sync::PoisonError;
use tracing::trace;

/// Execute a partition with an engine-managed scratchpad.
///
/// Per call: handle counts are checked before anything else, the calling
/// thread's args set is fetched (or built) from the resource cache, external
/// handles are rebound, scratchpad storage is acquired for the duration of
/// the call, and the kernel invocations run in plan order. The first kernel
/// failure aborts the call; the scratchpad is released either way.
///
/// # Errors
///
/// [`ExecError::HandleCountMismatch`] if the handle lists do not match the
/// partition declaration (checked before any kernel runs),
/// [`ExecError::Kernel`] carrying the index and source of the first failing
/// invocation, or an allocation failure.
#[tracing::instrument(skip_all, fields(partition = partition.id().raw()))]
pub fn execute(
    partition: &CompiledPartition,
    stream: &dyn Stream,
    inputs: &[MemoryHandle],
    outputs: &[MemoryHandle],
) -> Result<()> {
    check_handle_counts(partition, inputs, outputs)?;

    let scratchpad = ScopedScratchpad::new(
        partition.allocator(),
        partition.memory_plan().scratchpad_size,
    )?;
    run(partition, stream, inputs, outputs, scratchpad.handle())
}

/// Execute with a caller-supplied scratchpad buffer.
///
/// The buffer must hold at least the plan's scratchpad size; otherwise the
/// call fails with [`ExecError::ScratchpadTooSmall`] before any kernel runs.
#[tracing::instrument(skip_all, fields(partition = partition.id().raw()))]
pub fn execute_with_scratchpad(
    partition: &CompiledPartition,
    stream: &dyn Stream,
    inputs: &[MemoryHandle],
    outputs: &[MemoryHandle],
    scratchpad: MemoryHandle,
) -> Result<()> {
    check_handle_counts(partition, inputs, outputs)?;

    let required = partition.memory_plan().scratchpad_size;
    if scratchpad.len() < required {
        return Err(ExecError::ScratchpadTooSmall {
            required,
            actual: scratchpad.len(),
        });
    }
    run(partition, stream, inputs, outputs, scratchpad)
}

fn check_handle_counts(
    partition: &CompiledPartition,
    inputs: &[MemoryHandle],
    outputs: &[MemoryHandle],
) -> Result<()> {
    if inputs.len() != partition.input_types().len() {
        return Err(ExecError::HandleCountMismatch {
            role: "input",
            expected: partition.input_types().len(),
            actual: inputs.len(),
        });
    }
    if outputs.len() != partition.output_types().len() {
        return Err(ExecError::HandleCountMismatch {
            role: "output",
            expected: partition.output_types().len(),
            actual: outputs.len(),
        });
    }
    Ok(())
}

fn run(
    partition: &CompiledPartition,
    stream: &dyn Stream,
    inputs: &[MemoryHandle],
    outputs: &[MemoryHandle],
    scratchpad: MemoryHandle,
) -> Result<()> {
    let args = ResourceCache::get_or_create(partition.id(), || partition.instantiate_args())?;
    let mut args = args.lock().unwrap_or_else(PoisonError::into_inner);

    args.bind_external_inputs(inputs);
    args.bind_external_outputs(outputs);
    args.bind_scratchpad(scratchpad);

    for (index, invocation) in partition.invocations().iter().enumerate() {
        trace!(index, kernel = invocation.kernel.name(), "running invocation");
        invocation
            .kernel
            .execute(stream, args.invocation_args(index))
            .map_err(|source| ExecError::Kernel {
                index,
                name: invocation.name.clone(),
                source,
            })?;
    }

    Ok(())
}
