//! The ordered pass pipeline.
//!
//! A pipeline is a list of named passes, each taking the subgraph by value
//! and returning the rewritten subgraph. The first failing pass aborts the
//! pipeline; no best-effort recovery is attempted.

use crate::error::{CompileError, PassError};
use cinnabar_core::{PartitionId, SubgraphIr};
use tracing::debug;

/// A pipeline pass: consumes the subgraph, returns the rewritten subgraph.
pub type PassFn<'a> = Box<dyn FnMut(SubgraphIr) -> Result<SubgraphIr, PassError> + 'a>;

/// Hook invoked around each pass with the current subgraph and a stage tag.
///
/// Visualizer failures are logged and ignored; they never abort compilation.
pub type Visualizer<'a> = Box<dyn Fn(&SubgraphIr, &str) -> anyhow::Result<()> + 'a>;

/// An ordered, named sequence of rewrite passes over one partition.
pub struct PassPipeline<'a> {
    passes: Vec<(String, PassFn<'a>)>,
    visualizer: Option<Visualizer<'a>>,
}

impl<'a> PassPipeline<'a> {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            visualizer: None,
        }
    }

    /// Append a named pass.
    pub fn add_pass<F>(&mut self, name: &str, pass: F)
    where
        F: FnMut(SubgraphIr) -> Result<SubgraphIr, PassError> + 'a,
    {
        self.passes.push((name.to_string(), Box::new(pass)));
    }

    /// Install a visualizer hook.
    pub fn set_visualizer<F>(&mut self, visualizer: F)
    where
        F: Fn(&SubgraphIr, &str) -> anyhow::Result<()> + 'a,
    {
        self.visualizer = Some(Box::new(visualizer));
    }

    /// Names of the registered passes, in execution order.
    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|(name, _)| name.as_str())
    }

    /// Run every pass in order. The first failure aborts with the pass name
    /// and partition id attached.
    pub fn run(
        &mut self,
        mut ir: SubgraphIr,
        partition: PartitionId,
    ) -> Result<SubgraphIr, CompileError> {
        self.visualize(&ir, "input");

        for (name, pass) in &mut self.passes {
            let span = tracing::debug_span!("pass", name = name.as_str()).entered();
            ir = pass(ir).map_err(|source| CompileError::Pass {
                pass: name.clone(),
                partition: partition.raw(),
                source,
            })?;
            debug!(nodes = ir.node_count(), "pass complete");
            drop(span);

            if let Some(visualizer) = &self.visualizer {
                if let Err(error) = visualizer(&ir, name) {
                    debug!(%error, pass = name.as_str(), "visualizer failed");
                }
            }
        }

        Ok(ir)
    }

    fn visualize(&self, ir: &SubgraphIr, stage: &str) {
        if let Some(visualizer) = &self.visualizer {
            if let Err(error) = visualizer(ir, stage) {
                debug!(%error, stage, "visualizer failed");
            }
        }
    }
}

impl Default for PassPipeline<'_> {
    fn default() -> Self {
        Self::new()
    }
}
