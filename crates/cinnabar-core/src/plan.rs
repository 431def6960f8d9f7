//! Compiled-partition artifacts: memory plan, kernel invocations, and the
//! execution args set.
//!
//! Everything in this module except [`ExecutionArgsSet`] is immutable after
//! compilation and safe to share read-only across threads. Args sets are the
//! only per-call mutable state and are strictly thread-owned via the
//! execution resource cache.

use crate::cache::ResourceCache;
use crate::handle::MemoryHandle;
use crate::tensor::TensorId;
use crate::traits::{Allocator, ExecutableKernel, RawBuffer};
use crate::types::DataType;
use crate::{Error, Result};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Alignment for arena and scratchpad slots, in bytes.
pub const SLOT_ALIGNMENT: usize = 64;

/// Round `size` up to the slot alignment.
pub fn align_up(size: usize) -> usize {
    (size + SLOT_ALIGNMENT - 1) & !(SLOT_ALIGNMENT - 1)
}

// ─────────────────────────────── PartitionId ─────────────────────────────

/// Process-unique identity of a compiled partition.
///
/// Allocated from a monotonic counter rather than derived from an object
/// address, so cache keys can never collide through address reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId(u64);

impl PartitionId {
    /// Allocate the next partition id.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

// ──────────────────────────────── ArgSlot ────────────────────────────────

/// Where a kernel argument's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// Aliases the caller-supplied input handle at this index.
    ExternalInput(usize),
    /// Aliases the caller-supplied output handle at this index.
    ExternalOutput(usize),
    /// Offset range in the persistent internal arena (per-args-set backing).
    Internal { offset: usize, size: usize },
    /// Offset range in the per-call scratchpad arena.
    Scratchpad { offset: usize, size: usize },
}

// ─────────────────────────────── MemoryPlan ──────────────────────────────

/// The memory planner's output: a slot per planned tensor, the in-place
/// pairs, and the two arena totals.
///
/// Invariant: slots live at the same program point never overlap in offset
/// range unless their tensors form a declared in-place pair.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlan {
    /// Slot assignment per tensor.
    assignments: HashMap<TensorId, ArgSlot>,

    /// (input, output) tensor pairs safe to alias.
    pub inplace_pairs: Vec<(TensorId, TensorId)>,

    /// Total bytes of the persistent internal arena. Fixed at compile time.
    pub arena_size: usize,

    /// Total bytes of the per-call scratchpad arena. Fixed at compile time;
    /// backing storage is supplied fresh (or reused) per execution.
    pub scratchpad_size: usize,
}

impl MemoryPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tensor's slot.
    pub fn assign(&mut self, tensor: TensorId, slot: ArgSlot) {
        self.assignments.insert(tensor, slot);
    }

    /// Look up a tensor's slot.
    pub fn slot(&self, tensor: TensorId) -> Result<ArgSlot> {
        self.assignments
            .get(&tensor)
            .copied()
            .ok_or_else(|| Error::Plan(format!("tensor {:?} has no memory slot", tensor)))
    }

    /// Iterate over all assignments.
    pub fn assignments(&self) -> impl Iterator<Item = (TensorId, ArgSlot)> + '_ {
        self.assignments.iter().map(|(&t, &s)| (t, s))
    }
}

// ──────────────────────────── KernelInvocation ───────────────────────────

/// One bound kernel call in the compiled plan.
pub struct KernelInvocation {
    /// The resolved kernel.
    pub kernel: Arc<dyn ExecutableKernel>,

    /// Where each argument's bytes come from, in the kernel's argument order.
    pub bindings: Vec<ArgSlot>,

    /// Name of the originating op node, for diagnostics.
    pub name: String,
}

impl std::fmt::Debug for KernelInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelInvocation")
            .field("kernel", &self.kernel.name())
            .field("bindings", &self.bindings)
            .field("name", &self.name)
            .finish()
    }
}

// ──────────────────────────── ExecutionArgsSet ───────────────────────────

/// A binding of an argument position to an external handle index.
#[derive(Debug, Clone, Copy)]
struct ExternalBinding {
    invocation: usize,
    arg: usize,
    index: usize,
}

/// A binding of an argument position to an arena offset range.
#[derive(Debug, Clone, Copy)]
struct SlotBinding {
    invocation: usize,
    arg: usize,
    offset: usize,
    size: usize,
}

/// Internal arena backing owned by one args set, released on drop.
struct ArenaBuffer {
    buffer: RawBuffer,
    allocator: Arc<dyn Allocator>,
}

impl Drop for ArenaBuffer {
    fn drop(&mut self) {
        self.allocator.release(self.buffer);
    }
}

/// The concrete, thread-owned binding of kernel arguments to memory handles
/// for one compiled partition.
///
/// Exactly one instance exists per (partition, thread) pair at a time. The
/// template instance (arena-less, all handles null) is built once at compile
/// time; thread instances are cloned from it lazily on first execution and
/// mutated in place on every call.
pub struct ExecutionArgsSet {
    /// Per-invocation argument handles, in binding order.
    args: Vec<Vec<MemoryHandle>>,

    /// Argument positions bound to external input handles.
    external_inputs: Vec<ExternalBinding>,

    /// Argument positions bound to external output handles.
    external_outputs: Vec<ExternalBinding>,

    /// Argument positions bound to scratchpad offsets; rebound each call.
    scratchpad_slots: Vec<SlotBinding>,

    /// Argument positions bound to internal-arena offsets; bound once at
    /// instantiation.
    internal_slots: Vec<SlotBinding>,

    /// Arena backing; `None` for the compile-time template.
    arena: Option<ArenaBuffer>,
}

impl ExecutionArgsSet {
    /// Create an empty template.
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            external_inputs: Vec::new(),
            external_outputs: Vec::new(),
            scratchpad_slots: Vec::new(),
            internal_slots: Vec::new(),
            arena: None,
        }
    }

    /// Append one invocation's bindings to the template.
    ///
    /// Classifies each binding into the rebinding lists so that execution
    /// can update handles without consulting the memory plan.
    pub fn push_invocation(&mut self, bindings: &[ArgSlot]) {
        let invocation = self.args.len();
        self.args.push(vec![MemoryHandle::null(); bindings.len()]);

        for (arg, slot) in bindings.iter().enumerate() {
            match *slot {
                ArgSlot::ExternalInput(index) => self.external_inputs.push(ExternalBinding {
                    invocation,
                    arg,
                    index,
                }),
                ArgSlot::ExternalOutput(index) => self.external_outputs.push(ExternalBinding {
                    invocation,
                    arg,
                    index,
                }),
                ArgSlot::Scratchpad { offset, size } => self.scratchpad_slots.push(SlotBinding {
                    invocation,
                    arg,
                    offset,
                    size,
                }),
                ArgSlot::Internal { offset, size } => self.internal_slots.push(SlotBinding {
                    invocation,
                    arg,
                    offset,
                    size,
                }),
            }
        }
    }

    /// Clone the template into a thread-owned instance.
    ///
    /// Allocates this instance's internal arena, copies the partition's
    /// constant image into it, and binds the internal slots. External and
    /// scratchpad slots stay null until the first call binds them.
    fn instantiate(
        &self,
        allocator: &Arc<dyn Allocator>,
        arena_size: usize,
        constants: &[(usize, Vec<u8>)],
    ) -> Result<Self> {
        let mut instance = Self {
            args: self.args.clone(),
            external_inputs: self.external_inputs.clone(),
            external_outputs: self.external_outputs.clone(),
            scratchpad_slots: self.scratchpad_slots.clone(),
            internal_slots: self.internal_slots.clone(),
            arena: None,
        };

        if arena_size > 0 {
            let buffer = allocator.acquire(arena_size, SLOT_ALIGNMENT)?;
            let base = buffer.handle();

            for (offset, bytes) in constants {
                let slot = base.slice_at(*offset, bytes.len());
                // Arena was just acquired and is not yet visible to kernels.
                unsafe { slot.as_mut_slice().copy_from_slice(bytes) };
            }

            for binding in &instance.internal_slots {
                instance.args[binding.invocation][binding.arg] =
                    base.slice_at(binding.offset, binding.size);
            }

            instance.arena = Some(ArenaBuffer {
                buffer,
                allocator: Arc::clone(allocator),
            });
        }

        Ok(instance)
    }

    /// Rebind every external-input argument to the caller's handles.
    pub fn bind_external_inputs(&mut self, inputs: &[MemoryHandle]) {
        for binding in &self.external_inputs {
            self.args[binding.invocation][binding.arg] = inputs[binding.index];
        }
    }

    /// Rebind every external-output argument to the caller's handles.
    pub fn bind_external_outputs(&mut self, outputs: &[MemoryHandle]) {
        for binding in &self.external_outputs {
            self.args[binding.invocation][binding.arg] = outputs[binding.index];
        }
    }

    /// Rebind every scratchpad argument against a fresh scratchpad base.
    pub fn bind_scratchpad(&mut self, base: MemoryHandle) {
        for binding in &self.scratchpad_slots {
            self.args[binding.invocation][binding.arg] =
                base.slice_at(binding.offset, binding.size);
        }
    }

    /// The bound argument handles of one invocation.
    pub fn invocation_args(&self, invocation: usize) -> &[MemoryHandle] {
        &self.args[invocation]
    }

    /// Number of invocations in this args set.
    pub fn invocation_count(&self) -> usize {
        self.args.len()
    }
}

impl Default for ExecutionArgsSet {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────── CompiledPartition ───────────────────────────

/// Immutable compiled artifact: ordered kernel invocations plus the memory
/// plan, produced once per partition compilation.
///
/// Safe to share by read-only reference across arbitrarily many threads.
/// Dropping the partition evicts its args-set entries from every thread's
/// resource cache, so no cached binding outlives the artifact it was
/// derived from.
pub struct CompiledPartition {
    id: PartitionId,
    invocations: Vec<KernelInvocation>,
    plan: MemoryPlan,
    input_types: Vec<DataType>,
    output_types: Vec<DataType>,
    template: ExecutionArgsSet,
    /// (arena offset, bytes) image of the constant tensors.
    constants: Vec<(usize, Vec<u8>)>,
    allocator: Arc<dyn Allocator>,
}

impl CompiledPartition {
    /// Freeze a compilation result into a partition artifact.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PartitionId,
        invocations: Vec<KernelInvocation>,
        plan: MemoryPlan,
        input_types: Vec<DataType>,
        output_types: Vec<DataType>,
        template: ExecutionArgsSet,
        constants: Vec<(usize, Vec<u8>)>,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        Self {
            id,
            invocations,
            plan,
            input_types,
            output_types,
            template,
            constants,
            allocator,
        }
    }

    /// Partition identity (the resource-cache key).
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// The ordered kernel invocations.
    pub fn invocations(&self) -> &[KernelInvocation] {
        &self.invocations
    }

    /// The finalized memory plan.
    pub fn memory_plan(&self) -> &MemoryPlan {
        &self.plan
    }

    /// Declared external input types, in declaration order.
    pub fn input_types(&self) -> &[DataType] {
        &self.input_types
    }

    /// Declared external output types, in declaration order.
    pub fn output_types(&self) -> &[DataType] {
        &self.output_types
    }

    /// The allocator this partition was compiled against.
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Build a thread-owned args set from the compile-time template.
    ///
    /// Called by the resource cache on the first execution per thread.
    pub fn instantiate_args(&self) -> Result<ExecutionArgsSet> {
        self.template
            .instantiate(&self.allocator, self.plan.arena_size, &self.constants)
    }
}

impl std::fmt::Debug for CompiledPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPartition")
            .field("id", &self.id)
            .field("invocations", &self.invocations)
            .field("plan", &self.plan)
            .field("input_types", &self.input_types)
            .field("output_types", &self.output_types)
            .finish_non_exhaustive()
    }
}

impl Drop for CompiledPartition {
    fn drop(&mut self) {
        ResourceCache::evict(self.id);
    }
}
