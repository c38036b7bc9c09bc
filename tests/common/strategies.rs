use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

use conductor_core::orchestration::{LinearWorkflowGraph, TaskSpec, WorkflowGraph};
use conductor_core::{ExecutionStatus, OrchestrationCoreBuilder};

use super::LEAF;

/// Strategy for any execution status
pub fn execution_status_strategy() -> impl Strategy<Value = ExecutionStatus> {
    prop::sample::select(ExecutionStatus::ALL.to_vec())
}

/// Shape of a generated workflow tree: `depth` nested workflow levels, the innermost
/// fanning a leaf action out over `width` items
#[derive(Debug, Clone, Copy)]
pub struct NestedWorkflowShape {
    pub depth: usize,
    pub width: usize,
}

impl NestedWorkflowShape {
    pub fn level_ref(level: usize) -> String {
        format!("nested.level{level}")
    }

    pub fn root_ref() -> String {
        Self::level_ref(0)
    }

    /// Every node in the tree: the workflow levels plus the leaves
    pub fn node_count(&self) -> usize {
        self.depth + self.width
    }

    pub fn register(&self, mut builder: OrchestrationCoreBuilder) -> OrchestrationCoreBuilder {
        for level in 0..self.depth {
            let spec = if level + 1 < self.depth {
                TaskSpec::new("sub", Self::level_ref(level + 1))
            } else {
                let items = (0..self.width).map(|i| json!(i)).collect();
                TaskSpec::new("leaf", LEAF).with_items(items, None)
            };
            let graph: Arc<dyn WorkflowGraph> = Arc::new(LinearWorkflowGraph::new(vec![spec]));
            builder = builder.register_graph(Self::level_ref(level), graph);
        }
        builder
    }
}

/// Strategy for small nested workflow trees
pub fn nested_shape_strategy() -> impl Strategy<Value = NestedWorkflowShape> {
    (1usize..=3, 1usize..=3).prop_map(|(depth, width)| NestedWorkflowShape { depth, width })
}
