use crate::config::PlanSettings;
use crate::error::{Result, SagaError};
use crate::event::{SqlUnit, TransactionId};
use crate::plan::SagaPlanEmitter;
use std::collections::HashSet;
use std::sync::Arc;

/// One recorded statement execution and its compensation
#[derive(Debug, Clone, PartialEq)]
pub struct SagaNode {
    pub request_id: String,
    pub data_source: String,
    pub statement: SqlUnit,
    pub compensation: SqlUnit,
    /// Frontier current when the node was added
    pub parents: Vec<String>,
    pub level: usize,
}

/// Per-transaction saga graph builder.
///
/// Nodes are grouped into levels. Every node of a level depends on exactly the
/// nodes of the previous non-empty level (the frontier); `switch_parents`
/// closes the current level. Since the frontier only ever moves forward the
/// graph is acyclic by construction.
#[derive(Debug)]
pub struct SagaGraphBuilder {
    transaction_id: TransactionId,
    settings: Arc<PlanSettings>,
    nodes: Vec<SagaNode>,
    request_ids: HashSet<String>,
    parents: Vec<String>,
    pending: Vec<String>,
    level: usize,
    finalized: bool,
}

impl SagaGraphBuilder {
    pub fn new(transaction_id: TransactionId, settings: Arc<PlanSettings>) -> Self {
        Self {
            transaction_id,
            settings,
            nodes: Vec::new(),
            request_ids: HashSet::new(),
            parents: Vec::new(),
            pending: Vec::new(),
            level: 0,
            finalized: false,
        }
    }

    /// Start a new dependency level.
    ///
    /// Nodes added since the last switch become the frontier. Without pending
    /// nodes the frontier is kept as is.
    pub fn switch_parents(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        self.parents = std::mem::take(&mut self.pending);
        self.level += 1;
        Ok(())
    }

    /// Append a node depending on the current frontier
    pub fn add_child_request(
        &mut self,
        request_id: impl Into<String>,
        data_source: impl Into<String>,
        statement: SqlUnit,
        compensation: SqlUnit,
    ) -> Result<()> {
        self.ensure_open()?;
        let request_id = request_id.into();

        if !self.request_ids.insert(request_id.clone()) {
            return Err(SagaError::invalid_state(
                &self.transaction_id,
                format!("request {} already recorded", request_id),
            ));
        }

        self.pending.push(request_id.clone());
        self.nodes.push(SagaNode {
            request_id,
            data_source: data_source.into(),
            statement,
            compensation,
            parents: self.parents.clone(),
            level: self.level,
        });
        Ok(())
    }

    /// Serialize the recorded graph. Does not mutate the builder.
    pub fn build(&self) -> Result<String> {
        SagaPlanEmitter::new(&self.settings).emit(&self.nodes)
    }

    /// Mark the builder consumed; later mutations fail with `InvalidState`.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn nodes(&self) -> &[SagaNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current parent frontier
    pub fn frontier(&self) -> &[String] {
        &self.parents
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Request ids grouped by level, in insertion order
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut levels: Vec<(usize, Vec<&str>)> = Vec::new();
        for node in &self.nodes {
            if let Some((level, group)) = levels.last_mut() {
                if *level == node.level {
                    group.push(node.request_id.as_str());
                    continue;
                }
            }
            levels.push((node.level, vec![node.request_id.as_str()]));
        }
        levels.into_iter().map(|(_, group)| group).collect()
    }

    /// Graph summary (for logging)
    pub fn describe(&self) -> String {
        self.levels()
            .iter()
            .enumerate()
            .map(|(i, group)| {
                if group.len() > 1 {
                    format!("Level {}: {} (parallel)", i + 1, group.join(" ∥ "))
                } else {
                    format!("Level {}: {}", i + 1, group[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(SagaError::invalid_state(
                &self.transaction_id,
                "saga graph already finalized",
            ));
        }
        Ok(())
    }
}
