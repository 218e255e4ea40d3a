/*
 * Saga Coordinator - Saga graph construction for sharded transactions
 *
 * Records the statements a distributed transaction executes across data
 * sources as a dependency graph of forward / compensating actions and emits
 * it as a saga plan on commit.
 *
 * Architecture:
 * - Graph Builder: per-transaction levels of parallel statements
 * - Transaction Registry: concurrent id → builder map (DashMap)
 * - Event Coordinator: lifecycle state machine, per-id ordering
 * - Plan Emitter: ServiceComb-style saga definition JSON
 */

// Public modules
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod graph;
pub mod listener;
pub mod plan;
pub mod policy;
pub mod registry;

// Re-exports
pub use config::{ConfigError, CoordinatorSettings, PlanSettings, SagaConfig};
pub use coordinator::{ExecutionOutcome, SagaEventCoordinator, TransactionOutcome, TransactionState};
pub use error::{ErrorKind, Result, SagaError};
pub use event::{
    SqlExecutionEvent, SqlExecutionEventType, SqlUnit, SqlValue, TransactionEvent, TransactionId,
    TransactionOperation,
};
pub use graph::{SagaGraphBuilder, SagaNode};
pub use listener::{
    EventChannel, EventSender, SqlExecutionListener, TransactionListener, DEFAULT_CHANNEL_CAPACITY,
};
pub use plan::{RecoveryPolicy, SagaDefinition, SagaPlanEmitter, SagaRequest, SagaSqlCommand};
pub use policy::{ExecutionFailurePolicy, FailureAction, FixedFailureAction, RecordOnly};
pub use registry::{BuilderHandle, InMemoryTransactionRegistry, TransactionRegistry};
