//! Saga plan format
//!
//! The serialized plan handed to the saga execution engine. Layout follows the
//! ServiceComb saga definition:
//!
//! ```json
//! {
//!   "policy": "BackwardRecovery",
//!   "requests": [
//!     {
//!       "id": "1",
//!       "datasource": "db0",
//!       "type": "sql",
//!       "transaction":  { "sql": "INSERT ...", "params": [[1]], "retries": 0 },
//!       "compensation": { "sql": "DELETE ...", "params": [[1]], "retries": 3 },
//!       "parents": [],
//!       "failRetryDelayMilliseconds": 5000
//!     }
//!   ]
//! }
//! ```
//!
//! Requests keep insertion order so identical graphs emit identical bytes.

use crate::config::PlanSettings;
use crate::error::{Result, SagaError};
use crate::event::{SqlUnit, SqlValue};
use crate::graph::SagaNode;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const REQUEST_TYPE_SQL: &str = "sql";

/// How the execution engine recovers from a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryPolicy {
    /// Undo completed requests by running their compensations
    BackwardRecovery,
    /// Keep retrying failed requests until they succeed
    ForwardRecovery,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPolicy::BackwardRecovery => "BackwardRecovery",
            RecoveryPolicy::ForwardRecovery => "ForwardRecovery",
        }
    }
}

impl std::fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaSqlCommand {
    pub sql: String,
    /// One parameter group per execution
    pub params: Vec<Vec<SqlValue>>,
    pub retries: u32,
}

impl SagaSqlCommand {
    fn from_unit(unit: &SqlUnit, retries: u32) -> Self {
        let params = if unit.parameters.is_empty() {
            Vec::new()
        } else {
            vec![unit.parameters.clone()]
        };
        Self {
            sql: unit.sql.clone(),
            params,
            retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaRequest {
    pub id: String,
    #[serde(rename = "datasource")]
    pub data_source: String,
    #[serde(rename = "type")]
    pub request_type: String,
    pub transaction: SagaSqlCommand,
    pub compensation: SagaSqlCommand,
    pub parents: Vec<String>,
    pub fail_retry_delay_milliseconds: u64,
}

/// Deserialized saga plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub policy: RecoveryPolicy,
    pub requests: Vec<SagaRequest>,
}

impl SagaDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_json::to_string(self)?)
    }

    pub fn request(&self, id: &str) -> Option<&SagaRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Check that every parent exists and the dependency graph is acyclic
    pub fn validate(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    /// Request ids grouped by longest dependency distance from a root.
    ///
    /// Requests of one group have no dependencies among each other and can be
    /// dispatched in parallel once the previous groups completed.
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>> {
        let order = self.topological_order()?;

        let mut depth: HashMap<&str, usize> = HashMap::with_capacity(self.requests.len());
        for idx in order {
            let request = &self.requests[idx];
            let d = request
                .parents
                .iter()
                .filter_map(|p| depth.get(p.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(request.id.as_str(), d);
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        for request in &self.requests {
            let d = depth[request.id.as_str()];
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(request.id.clone());
        }
        Ok(levels)
    }

    /// Indices into `requests` in dependency order
    fn topological_order(&self) -> Result<Vec<usize>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.requests.len(), 0);
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(self.requests.len());

        for (i, request) in self.requests.iter().enumerate() {
            let node = graph.add_node(i);
            if index.insert(request.id.as_str(), node).is_some() {
                return Err(SagaError::Serialization(format!(
                    "duplicate request id {}",
                    request.id
                )));
            }
        }

        for request in &self.requests {
            let child = index[request.id.as_str()];
            for parent in &request.parents {
                let parent_idx = index.get(parent.as_str()).ok_or_else(|| {
                    SagaError::Serialization(format!(
                        "request {} depends on unknown request {}",
                        request.id, parent
                    ))
                })?;
                graph.add_edge(*parent_idx, child, ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            SagaError::Serialization(format!(
                "dependency cycle through request {}",
                self.requests[graph[cycle.node_id()]].id
            ))
        })?;

        Ok(sorted.into_iter().map(|n| graph[n]).collect())
    }
}

/// Graph → serialized plan. Stateless apart from the plan settings it stamps
/// into every request.
pub struct SagaPlanEmitter<'a> {
    settings: &'a PlanSettings,
}

impl<'a> SagaPlanEmitter<'a> {
    pub fn new(settings: &'a PlanSettings) -> Self {
        Self { settings }
    }

    pub fn definition(&self, nodes: &[SagaNode]) -> SagaDefinition {
        let requests = nodes
            .iter()
            .map(|node| SagaRequest {
                id: node.request_id.clone(),
                data_source: node.data_source.clone(),
                request_type: REQUEST_TYPE_SQL.to_string(),
                transaction: SagaSqlCommand::from_unit(
                    &node.statement,
                    self.settings.transaction_max_retries,
                ),
                compensation: SagaSqlCommand::from_unit(
                    &node.compensation,
                    self.settings.compensation_max_retries,
                ),
                parents: node.parents.clone(),
                fail_retry_delay_milliseconds: self.settings.transaction_retry_delay_ms,
            })
            .collect();

        SagaDefinition {
            policy: self.settings.recovery_policy,
            requests,
        }
    }

    pub fn emit(&self, nodes: &[SagaNode]) -> Result<String> {
        self.definition(nodes).to_json()
    }
}
