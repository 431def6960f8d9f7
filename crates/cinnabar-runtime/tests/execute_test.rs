//! End-to-end tests: compile a subgraph, execute it, check the numbers.

mod common;

use common::{assert_close, f32_constant, f32_tensor, handle, sigmoid, system_allocator};

use cinnabar_compiler::{compile, CompileOptions};
use cinnabar_core::{OpKind, OpNode, ResourceCache, SubgraphIr, TensorRole};
use cinnabar_runtime::{execute, execute_with_scratchpad, CpuEngine, CpuStream, ExecError};

use std::sync::Arc;

/// Mul(a, b) -> Relu, fusible into a single invocation.
fn mul_relu_graph(dims: &[usize]) -> SubgraphIr {
    let mut ir = SubgraphIr::new();
    let a = ir.add_tensor(f32_tensor("a", dims, TensorRole::Input));
    let b = ir.add_tensor(f32_tensor("b", dims, TensorRole::Input));
    let t = ir.add_tensor(f32_tensor("t", dims, TensorRole::Internal));
    let y = ir.add_tensor(f32_tensor("y", dims, TensorRole::Output));
    ir.inputs = vec![a, b];
    ir.outputs = vec![y];
    ir.add_node(
        OpNode::new(OpKind::Mul)
            .named("mul")
            .with_inputs(vec![a, b])
            .with_outputs(vec![t]),
    );
    ir.add_node(
        OpNode::new(OpKind::Relu)
            .named("relu")
            .with_inputs(vec![t])
            .with_outputs(vec![y]),
    );
    ir
}

#[test]
fn test_fused_mul_relu_numerics() {
    let partition = compile(
        mul_relu_graph(&[4]),
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();

    // Fusion collapsed the chain into one invocation.
    assert_eq!(partition.invocations().len(), 1);

    let mut a = [1.0f32, -2.0, 3.0, -4.0];
    let mut b = [2.0f32, 2.0, -2.0, -2.0];
    let mut y = [0.0f32; 4];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_close(&y, &[2.0, 0.0, 0.0, 8.0]);
}

#[test]
fn test_fusion_does_not_change_results() {
    let mut a = [0.5f32, -1.5, 2.5, -3.5];
    let mut b = [1.0f32, -2.0, -3.0, 4.0];

    let mut fused_out = [0.0f32; 4];
    let fused = compile(
        mul_relu_graph(&[4]),
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();
    execute(
        &fused,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut fused_out)],
    )
    .unwrap();

    let mut unfused_out = [0.0f32; 4];
    let unfused = compile(
        mul_relu_graph(&[4]),
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions {
            fusion: cinnabar_compiler::FusionConfig::disabled(),
        },
    )
    .unwrap();
    assert_eq!(unfused.invocations().len(), 2);
    execute(
        &unfused,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut unfused_out)],
    )
    .unwrap();

    assert_close(&fused_out, &unfused_out);
}

#[test]
fn test_broadcast_add_numerics() {
    let mut ir = SubgraphIr::new();
    let a = ir.add_tensor(f32_tensor("a", &[2, 3], TensorRole::Input));
    let b = ir.add_tensor(f32_tensor("b", &[3], TensorRole::Input));
    let y = ir.add_tensor(f32_tensor("y", &[2, 3], TensorRole::Output));
    ir.inputs = vec![a, b];
    ir.outputs = vec![y];
    ir.add_node(
        OpNode::new(OpKind::Add)
            .named("add")
            .with_inputs(vec![a, b])
            .with_outputs(vec![y]),
    );

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();

    let mut a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut b = [10.0f32, 20.0, 30.0];
    let mut y = [0.0f32; 6];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_close(&y, &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
}

#[test]
fn test_squared_difference_lowering_numerics() {
    let mut ir = SubgraphIr::new();
    let a = ir.add_tensor(f32_tensor("a", &[4], TensorRole::Input));
    let b = ir.add_tensor(f32_tensor("b", &[4], TensorRole::Input));
    let y = ir.add_tensor(f32_tensor("y", &[4], TensorRole::Output));
    ir.inputs = vec![a, b];
    ir.outputs = vec![y];
    ir.add_node(
        OpNode::new(OpKind::SquaredDifference)
            .named("sqdiff")
            .with_inputs(vec![a, b])
            .with_outputs(vec![y]),
    );

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();

    let mut a = [1.0f32, 5.0, -2.0, 0.0];
    let mut b = [3.0f32, 1.0, -2.0, -4.0];
    let mut y = [0.0f32; 4];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_close(&y, &[4.0, 16.0, 0.0, 16.0]);
}

#[test]
fn test_sigmoid_mul_folds_to_swish() {
    let mut ir = SubgraphIr::new();
    let x = ir.add_tensor(f32_tensor("x", &[4], TensorRole::Input));
    let s = ir.add_tensor(f32_tensor("s", &[4], TensorRole::Internal));
    let y = ir.add_tensor(f32_tensor("y", &[4], TensorRole::Output));
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
            .named("scale")
            .with_inputs(vec![x, s])
            .with_outputs(vec![y]),
    );

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();
    assert_eq!(partition.invocations().len(), 1);
    assert_eq!(partition.invocations()[0].kernel.name(), "cpu_swish_f32");

    let mut x = [-2.0f32, -0.5, 0.5, 2.0];
    let mut y = [0.0f32; 4];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut x)],
        &[handle(&mut y)],
    )
    .unwrap();

    let expected: Vec<f32> = x.iter().map(|&v| v * sigmoid(v)).collect();
    assert_close(&y, &expected);
}

#[test]
fn test_reciprocal_mul_folds_to_div() {
    let mut ir = SubgraphIr::new();
    let a = ir.add_tensor(f32_tensor("a", &[3], TensorRole::Input));
    let x = ir.add_tensor(f32_tensor("x", &[3], TensorRole::Input));
    let r = ir.add_tensor(f32_tensor("r", &[3], TensorRole::Internal));
    let y = ir.add_tensor(f32_tensor("y", &[3], TensorRole::Output));
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

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();
    assert_eq!(partition.invocations().len(), 1);
    assert_eq!(partition.invocations()[0].kernel.name(), "cpu_div_f32");

    let mut a = [1.0f32, 9.0, -8.0];
    let mut x = [2.0f32, 3.0, 4.0];
    let mut y = [0.0f32; 3];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut x)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_close(&y, &[0.5, 3.0, -2.0]);
}

#[test]
fn test_constant_operand_lives_in_arena() {
    let mut ir = SubgraphIr::new();
    let x = ir.add_tensor(f32_tensor("x", &[4], TensorRole::Input));
    let w = ir.add_tensor(f32_constant("w", &[4], &[2.0, 3.0, 4.0, 5.0]));
    let y = ir.add_tensor(f32_tensor("y", &[4], TensorRole::Output));
    ir.inputs = vec![x];
    ir.outputs = vec![y];
    ir.add_node(
        OpNode::new(OpKind::Mul)
            .named("scale")
            .with_inputs(vec![x, w])
            .with_outputs(vec![y]),
    );

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();
    assert!(partition.memory_plan().arena_size > 0);

    let mut x = [1.0f32, 1.0, 2.0, 2.0];
    let mut y = [0.0f32; 4];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut x)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_close(&y, &[2.0, 3.0, 8.0, 10.0]);
}

#[test]
fn test_handle_count_mismatch_before_any_kernel() {
    let partition = compile(
        mul_relu_graph(&[4]),
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();

    let mut a = [1.0f32; 4];
    let mut y = [7.0f32; 4];
    let err = execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a)],
        &[handle(&mut y)],
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ExecError::HandleCountMismatch {
            role: "input",
            expected: 2,
            actual: 1,
        }
    ));
    // The output buffer was never written.
    assert_close(&y, &[7.0; 4]);
}

#[test]
fn test_caller_scratchpad_size_is_checked() {
    // Two transients alive at once force a nonzero scratchpad.
    let mut ir = SubgraphIr::new();
    let a = ir.add_tensor(f32_tensor("a", &[16], TensorRole::Input));
    let t0 = ir.add_tensor(f32_tensor("t0", &[16], TensorRole::Internal));
    let t1 = ir.add_tensor(f32_tensor("t1", &[16], TensorRole::Internal));
    let y = ir.add_tensor(f32_tensor("y", &[16], TensorRole::Output));
    ir.inputs = vec![a];
    ir.outputs = vec![y];
    ir.add_node(
        OpNode::new(OpKind::Sigmoid)
            .with_inputs(vec![a])
            .with_outputs(vec![t0]),
    );
    ir.add_node(
        OpNode::new(OpKind::Relu)
            .with_inputs(vec![a])
            .with_outputs(vec![t1]),
    );
    ir.add_node(
        OpNode::new(OpKind::Max)
            .with_inputs(vec![t0, t1])
            .with_outputs(vec![y]),
    );

    let partition = compile(
        ir,
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();
    let required = partition.memory_plan().scratchpad_size;
    assert!(required > 0);

    let mut a = [2.0f32; 16];
    let mut y = [0.0f32; 16];
    let mut short = vec![0u8; required - 1];
    let err = execute_with_scratchpad(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a)],
        &[handle(&mut y)],
        cinnabar_core::MemoryHandle::from_slice(&mut short),
    )
    .unwrap_err();
    assert!(matches!(err, ExecError::ScratchpadTooSmall { .. }));

    let mut pad = vec![0u8; required];
    execute_with_scratchpad(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a)],
        &[handle(&mut y)],
        cinnabar_core::MemoryHandle::from_slice(&mut pad),
    )
    .unwrap();
    // max(sigmoid(2.0), relu(2.0)) == 2.0
    assert_close(&y, &[2.0; 16]);
}

#[test]
fn test_repeated_execution_reuses_cached_args() {
    let partition = compile(
        mul_relu_graph(&[4]),
        &CpuEngine::new(),
        system_allocator(),
        CompileOptions::default(),
    )
    .unwrap();

    let mut a = [1.0f32; 4];
    let mut b = [2.0f32; 4];
    let mut y = [0.0f32; 4];
    for _ in 0..3 {
        execute(
            &partition,
            &CpuStream::new(),
            &[handle(&mut a), handle(&mut b)],
            &[handle(&mut y)],
        )
        .unwrap();
        assert_close(&y, &[2.0; 4]);
    }

    assert_eq!(ResourceCache::entry_count(partition.id()), 1);
}

#[test]
fn test_drop_evicts_every_threads_entry() {
    let partition = Arc::new(
        compile(
            mul_relu_graph(&[4]),
            &CpuEngine::new(),
            system_allocator(),
            CompileOptions::default(),
        )
        .unwrap(),
    );
    let id = partition.id();

    let worker = {
        let partition = Arc::clone(&partition);
        std::thread::spawn(move || {
            let mut a = [1.0f32; 4];
            let mut b = [3.0f32; 4];
            let mut y = [0.0f32; 4];
            execute(
                &partition,
                &CpuStream::new(),
                &[handle(&mut a), handle(&mut b)],
                &[handle(&mut y)],
            )
            .unwrap();
        })
    };
    worker.join().unwrap();

    let mut a = [1.0f32; 4];
    let mut b = [3.0f32; 4];
    let mut y = [0.0f32; 4];
    execute(
        &partition,
        &CpuStream::new(),
        &[handle(&mut a), handle(&mut b)],
        &[handle(&mut y)],
    )
    .unwrap();

    assert_eq!(ResourceCache::entry_count(id), 2);
    drop(partition);
    assert_eq!(ResourceCache::entry_count(id), 0);
}

#[test]
fn test_concurrent_execution_is_isolated() {
    let partition = Arc::new(
        compile(
            mul_relu_graph(&[64]),
            &CpuEngine::new(),
            system_allocator(),
            CompileOptions::default(),
        )
        .unwrap(),
    );

    let mut workers = Vec::new();
    for seed in 0..4u64 {
        let partition = Arc::clone(&partition);
        workers.push(std::thread::spawn(move || {
            use rand::{Rng, SeedableRng};
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

            for _ in 0..50 {
                let mut a: Vec<f32> = (0..64).map(|_| rng.gen_range(-4.0..4.0)).collect();
                let mut b: Vec<f32> = (0..64).map(|_| rng.gen_range(-4.0..4.0)).collect();
                let expected: Vec<f32> =
                    a.iter().zip(b.iter()).map(|(x, y)| (x * y).max(0.0)).collect();

                let mut out = vec![0.0f32; 64];
                execute(
                    &partition,
                    &CpuStream::new(),
                    &[handle(&mut a), handle(&mut b)],
                    &[handle(&mut out)],
                )
                .unwrap();
                assert_close(&out, &expected);
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ResourceCache::entry_count(partition.id()), 4);
}
