//! TOML topology descriptions for offline scheduler runs.
//!
//! A topology file lists nodes by name, who they feed, and how much
//! synthetic work each performs per cycle:
//!
//! ```toml
//! threads = 4
//! queue_capacity = 256
//!
//! [[node]]
//! name = "src"
//! feeds = ["eq", "comp"]
//! work_us = 50
//!
//! [[node]]
//! name = "eq"
//! feeds = ["mix"]
//!
//! [[node]]
//! name = "comp"
//! feeds = ["mix"]
//!
//! [[node]]
//! name = "mix"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;

use cauce_graph::{
    CycleContext, GraphEdges, GraphNode, ProcessOutcome, RouteProcessor, SchedulerConfig,
};

/// Errors raised while loading or building a topology description.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Failed to read the topology file
    #[error("failed to read topology '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse topology: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two nodes share a name
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    /// An edge points at a name with no node
    #[error("node '{from}' feeds unknown node '{to}'")]
    UnknownTarget {
        /// Source node of the dangling edge.
        from: String,
        /// The name that matched no node.
        to: String,
    },
}

/// One node entry in a topology file.
#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    /// Unique node name.
    pub name: String,
    /// Names of the nodes this one feeds.
    #[serde(default)]
    pub feeds: Vec<String>,
    /// Synthetic busy-work per cycle, in microseconds.
    #[serde(default)]
    pub work_us: u64,
}

/// A parsed topology file.
#[derive(Debug, Deserialize)]
pub struct TopologyFile {
    /// Total processing threads (see [`SchedulerConfig::threads`]).
    pub threads: Option<usize>,
    /// Trigger-queue capacity override.
    pub queue_capacity: Option<usize>,
    /// The node list.
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeSpec>,
}

impl TopologyFile {
    /// Loads and parses a topology description.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Scheduler configuration derived from the file's header fields.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            threads: self.threads.or(defaults.threads),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
        }
    }

    /// Builds the node set and edge relation described by the file.
    ///
    /// Every node gets a [`SyntheticRoute`] processor; edge targets must
    /// name a node in the file.
    pub fn build(&self) -> Result<(Vec<Arc<GraphNode>>, GraphEdges), TopologyError> {
        let mut by_name: HashMap<&str, Arc<GraphNode>> = HashMap::with_capacity(self.nodes.len());
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for spec in &self.nodes {
            let node = GraphNode::new(Arc::new(SyntheticRoute::new(
                &spec.name,
                Duration::from_micros(spec.work_us),
            )));
            if by_name.insert(spec.name.as_str(), Arc::clone(&node)).is_some() {
                return Err(TopologyError::DuplicateNode(spec.name.clone()));
            }
            nodes.push(node);
        }

        let mut edges = GraphEdges::new();
        for spec in &self.nodes {
            let from = &by_name[spec.name.as_str()];
            for target in &spec.feeds {
                let to = by_name
                    .get(target.as_str())
                    .ok_or_else(|| TopologyError::UnknownTarget {
                        from: spec.name.clone(),
                        to: target.clone(),
                    })?;
                edges.add(from, to);
            }
        }

        Ok((nodes, edges))
    }
}

/// Stand-in for a routing entity: spins for a configured duration and counts
/// its invocations.
pub struct SyntheticRoute {
    name: String,
    work: Duration,
    cycles: AtomicU64,
}

impl SyntheticRoute {
    /// Creates a synthetic route that burns `work` of CPU per cycle.
    pub fn new(name: &str, work: Duration) -> Self {
        Self {
            name: name.to_string(),
            work,
            cycles: AtomicU64::new(0),
        }
    }

    /// Number of cycles this route has processed.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl RouteProcessor for SyntheticRoute {
    fn process(&self, _cycle: &CycleContext) -> ProcessOutcome {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if !self.work.is_zero() {
            let start = Instant::now();
            while start.elapsed() < self.work {
                std::hint::spin_loop();
            }
        }
        ProcessOutcome::default()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
threads = 3
queue_capacity = 128

[[node]]
name = "src"
feeds = ["mix"]
work_us = 10

[[node]]
name = "mix"
"#;

    #[test]
    fn parses_header_and_nodes() {
        let topo: TopologyFile = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(topo.threads, Some(3));
        assert_eq!(topo.queue_capacity, Some(128));
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.nodes[0].feeds, ["mix"]);
        assert_eq!(topo.nodes[1].work_us, 0);

        let config = topo.scheduler_config();
        assert_eq!(config.threads, Some(3));
        assert_eq!(config.queue_capacity, 128);
    }

    #[test]
    fn builds_nodes_and_edges() {
        let topo: TopologyFile = toml::from_str(EXAMPLE).unwrap();
        let (nodes, edges) = topo.build().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.feeds_from(&nodes[0]).len(), 1);
        assert!(edges.feeds_from(&nodes[1]).is_empty());
    }

    #[test]
    fn rejects_duplicate_names() {
        let topo: TopologyFile = toml::from_str(
            r#"
[[node]]
name = "a"
[[node]]
name = "a"
"#,
        )
        .unwrap();
        assert!(matches!(
            topo.build(),
            Err(TopologyError::DuplicateNode(name)) if name == "a"
        ));
    }

    #[test]
    fn rejects_unknown_edge_target() {
        let topo: TopologyFile = toml::from_str(
            r#"
[[node]]
name = "a"
feeds = ["missing"]
"#,
        )
        .unwrap();
        assert!(matches!(
            topo.build(),
            Err(TopologyError::UnknownTarget { from, to }) if from == "a" && to == "missing"
        ));
    }
}
