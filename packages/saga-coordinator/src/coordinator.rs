use crate::config::{CoordinatorSettings, SagaConfig};
use crate::error::{Result, SagaError};
use crate::event::{
    SqlExecutionEvent, SqlExecutionEventType, TransactionEvent, TransactionId,
    TransactionOperation,
};
use crate::graph::SagaGraphBuilder;
use crate::policy::{ExecutionFailurePolicy, FailureAction, RecordOnly};
use crate::registry::{BuilderHandle, InMemoryTransactionRegistry, TransactionRegistry};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Lifecycle state of one transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Unstarted,
    Active,
    Committed,
    RolledBack,
    /// COMMIT was processed but the plan could not be serialized
    CommitFailed,
}

impl TransactionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            TransactionState::Unstarted => "unstarted",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
            TransactionState::CommitFailed => "commit_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed
                | TransactionState::RolledBack
                | TransactionState::CommitFailed
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Result of a lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Begun,
    /// Plan written to the event's `plan_output`
    Committed { nodes: usize },
    RolledBack { discarded_nodes: usize },
}

/// Result of a statement execution event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    LevelSwitched { level: usize },
    NodeAdded { request_id: String, level: usize },
    FailureHandled(FailureAction),
}

/// Routes lifecycle and execution events to per-transaction saga graphs.
///
/// State machine per transaction id:
///
/// ```text
/// UNSTARTED --BEGIN--> ACTIVE --COMMIT--> COMMITTED | COMMIT_FAILED
///                        |  ^
///                        +--+ BEFORE_EXECUTE / EXECUTE_SUCCESS / EXECUTE_FAILURE
///                        |
///                        +--ROLLBACK--> ROLLED_BACK
/// ```
///
/// Handlers are synchronous and may be called from any number of threads.
/// Same-id events serialize on the builder mutex; a terminal event finalizes
/// the builder under that mutex, so an execution event racing it either lands
/// first or fails with `InvalidState`.
///
/// Registry insertion (BEGIN) and registry removal (terminal events) both run
/// under the `retired` lock, so an id is always either registered or retired
/// to a concurrent BEGIN. Lock order: `retired`, then registry shard.
pub struct SagaEventCoordinator {
    registry: Arc<dyn TransactionRegistry>,
    failure_policy: Arc<dyn ExecutionFailurePolicy>,
    retired: Mutex<LruCache<TransactionId, TransactionState>>,
    settings: CoordinatorSettings,
    /// Set while the active count is above the warn threshold
    over_threshold: AtomicBool,
}

impl SagaEventCoordinator {
    /// Coordinator with an in-memory registry
    pub fn new(config: SagaConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(InMemoryTransactionRegistry::new(config.plan));
        Ok(Self::from_parts(registry, config.coordinator))
    }

    /// Coordinator over an injected registry; `settings` are validated
    pub fn with_registry(
        registry: Arc<dyn TransactionRegistry>,
        settings: CoordinatorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self::from_parts(registry, settings))
    }

    fn from_parts(registry: Arc<dyn TransactionRegistry>, settings: CoordinatorSettings) -> Self {
        let capacity =
            NonZeroUsize::new(settings.retired_transaction_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry,
            failure_policy: Arc::new(RecordOnly),
            retired: Mutex::new(LruCache::new(capacity)),
            settings,
            over_threshold: AtomicBool::new(false),
        }
    }

    pub fn with_failure_policy(mut self, policy: Arc<dyn ExecutionFailurePolicy>) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Handle BEGIN / COMMIT / ROLLBACK
    pub fn on_transaction_event(&self, event: &mut TransactionEvent) -> Result<TransactionOutcome> {
        let id = event.transaction_id.clone();
        let operation = event.operation;
        let result = match operation {
            TransactionOperation::Begin => self.begin(&id),
            TransactionOperation::Commit => self.commit(&id).map(|(plan, nodes)| {
                event.plan_output = Some(plan);
                TransactionOutcome::Committed { nodes }
            }),
            TransactionOperation::Rollback => self.rollback(&id),
        };
        result.map_err(|e| self.report(&id, operation.as_str(), e))
    }

    /// Handle BEFORE_EXECUTE / EXECUTE_SUCCESS / EXECUTE_FAILURE
    pub fn on_sql_execution_event(&self, event: &SqlExecutionEvent) -> Result<ExecutionOutcome> {
        let id = &event.transaction_id;
        self.apply_execution(event)
            .map_err(|e| self.report(id, event.event_type.as_str(), e))
    }

    /// Current lifecycle state of `transaction_id` as far as this coordinator
    /// remembers. Terminated ids evicted from the retired set read as
    /// `Unstarted`.
    pub fn state(&self, transaction_id: &TransactionId) -> TransactionState {
        if self.registry.get_for_mutation(transaction_id).is_ok() {
            return TransactionState::Active;
        }
        self.retired
            .lock()
            .peek(transaction_id)
            .copied()
            .unwrap_or(TransactionState::Unstarted)
    }

    /// Builders not yet consumed by a terminal event
    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    fn begin(&self, id: &TransactionId) -> Result<TransactionOutcome> {
        {
            let retired = self.retired.lock();
            if let Some(state) = retired.peek(id) {
                return Err(SagaError::invalid_state(
                    id,
                    format!("BEGIN after transaction already {}", state),
                ));
            }
            self.registry.begin(id)?;
        }
        debug!("Saga transaction {} begun", id);

        let active = self.registry.active_count();
        if self.crossed_threshold(active) {
            warn!(
                "{} saga transactions active (threshold {}); terminal events may be missing",
                active, self.settings.active_transactions_warn_threshold
            );
        }
        Ok(TransactionOutcome::Begun)
    }

    /// True only on the BEGIN that takes the active count above the threshold.
    /// Re-armed once the count drops back to or below it.
    fn crossed_threshold(&self, active: usize) -> bool {
        if active > self.settings.active_transactions_warn_threshold {
            !self.over_threshold.swap(true, Ordering::Relaxed)
        } else {
            self.over_threshold.store(false, Ordering::Relaxed);
            false
        }
    }

    fn commit(&self, id: &TransactionId) -> Result<(String, usize)> {
        let handle = self.claim(id)?;

        let (result, nodes) = {
            let mut builder = handle.lock();
            self.finalize_once(id, &mut builder)?;
            debug!("Saga transaction {} plan:\n{}", id, builder.describe());
            (builder.build(), builder.len())
        };

        let state = match result {
            Ok(_) => TransactionState::Committed,
            Err(_) => TransactionState::CommitFailed,
        };
        self.retire(id, state)?;

        match result {
            Ok(plan) => {
                debug!("Saga transaction {} committed with {} requests", id, nodes);
                Ok((plan, nodes))
            }
            Err(e) => {
                error!(
                    "Saga transaction {} commit failed, plan not produced: {}",
                    id, e
                );
                Err(e)
            }
        }
    }

    fn rollback(&self, id: &TransactionId) -> Result<TransactionOutcome> {
        let handle = self.claim(id)?;

        let discarded_nodes = {
            let mut builder = handle.lock();
            self.finalize_once(id, &mut builder)?;
            builder.len()
        };
        self.retire(id, TransactionState::RolledBack)?;

        debug!(
            "Saga transaction {} rolled back, {} recorded requests discarded",
            id, discarded_nodes
        );
        Ok(TransactionOutcome::RolledBack { discarded_nodes })
    }

    fn apply_execution(&self, event: &SqlExecutionEvent) -> Result<ExecutionOutcome> {
        let id = &event.transaction_id;
        let handle = self
            .registry
            .get_for_mutation(id)
            .map_err(|e| self.unknown_or_retired(id, e))?;
        let mut builder = handle.lock();

        match event.event_type {
            SqlExecutionEventType::BeforeExecute => {
                builder.switch_parents()?;
                Ok(ExecutionOutcome::LevelSwitched {
                    level: builder.level(),
                })
            }
            SqlExecutionEventType::ExecuteSuccess => {
                builder.add_child_request(
                    event.request_id.clone(),
                    event.data_source.clone(),
                    event.statement.clone(),
                    event.compensation.clone(),
                )?;
                Ok(ExecutionOutcome::NodeAdded {
                    request_id: event.request_id.clone(),
                    level: builder.level(),
                })
            }
            SqlExecutionEventType::ExecuteFailure => {
                if builder.is_finalized() {
                    return Err(SagaError::invalid_state(id, "saga graph already finalized"));
                }
                let action = self.failure_policy.on_failure(event);
                warn!(
                    "Saga transaction {} request {} failed on {} (action: {})",
                    id,
                    event.request_id,
                    event.data_source,
                    action.as_str()
                );
                match action {
                    FailureAction::Record => Ok(ExecutionOutcome::FailureHandled(action)),
                    FailureAction::SkipLevel => {
                        builder.switch_parents()?;
                        Ok(ExecutionOutcome::FailureHandled(action))
                    }
                    FailureAction::Abort => Err(SagaError::ExecutionFailure {
                        transaction_id: id.clone(),
                        request_id: event.request_id.clone(),
                    }),
                }
            }
        }
    }

    /// Builder targeted by a terminal event. It stays registered until
    /// `retire`, so a concurrent BEGIN sees `DuplicateTransaction` meanwhile.
    fn claim(&self, id: &TransactionId) -> Result<BuilderHandle> {
        self.registry
            .get_for_mutation(id)
            .map_err(|e| self.unknown_or_retired(id, e))
    }

    /// Only the first terminal event may consume a builder
    fn finalize_once(&self, id: &TransactionId, builder: &mut SagaGraphBuilder) -> Result<()> {
        if builder.is_finalized() {
            return Err(SagaError::invalid_state(
                id,
                "another terminal event already consumed the saga graph",
            ));
        }
        builder.finalize();
        Ok(())
    }

    /// Unregister `id` and record its final state in one step
    fn retire(&self, id: &TransactionId, state: TransactionState) -> Result<()> {
        let mut retired = self.retired.lock();
        self.registry.remove(id)?;
        retired.put(id.clone(), state);
        Ok(())
    }

    fn unknown_or_retired(&self, id: &TransactionId, err: SagaError) -> SagaError {
        match err {
            SagaError::UnknownTransaction(_) => match self.retired.lock().peek(id) {
                Some(state) => {
                    SagaError::invalid_state(id, format!("transaction already {}", state))
                }
                None => err,
            },
            other => other,
        }
    }

    fn report(&self, id: &TransactionId, event_name: &str, err: SagaError) -> SagaError {
        if err.is_protocol_violation() {
            warn!(
                "Saga transaction {}: {} rejected ({}): {}",
                id,
                event_name,
                err.kind(),
                err
            );
        }
        err
    }
}

impl Default for SagaEventCoordinator {
    fn default() -> Self {
        Self::from_parts(
            Arc::new(InMemoryTransactionRegistry::default()),
            CoordinatorSettings::default(),
        )
    }
}
