//! Concurrency tests
//!
//! Many transactions driven from many threads at once; every plan must contain
//! exactly the requests recorded for its own transaction.

use saga_coordinator::{
    BuilderHandle, CoordinatorSettings, ErrorKind, EventChannel, InMemoryTransactionRegistry,
    Result, SagaDefinition, SagaEventCoordinator, SqlExecutionEvent, SqlUnit, SqlValue,
    TransactionEvent, TransactionId, TransactionOutcome, TransactionRegistry, TransactionState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const STATEMENTS: usize = 4;
const SHARDS: usize = 3;

fn run_transaction(c: &SagaEventCoordinator, tx: &str) -> SagaDefinition {
    c.on_transaction_event(&mut TransactionEvent::begin(tx))
        .unwrap();

    for stmt in 0..STATEMENTS {
        c.on_sql_execution_event(&SqlExecutionEvent::before_execute(tx))
            .unwrap();
        for shard in 0..SHARDS {
            c.on_sql_execution_event(&SqlExecutionEvent::success(
                tx,
                format!("{}-{}-{}", tx, stmt, shard),
                format!("db{}", shard),
                SqlUnit::new("INSERT INTO t VALUES (?)", vec![SqlValue::Int(stmt as i64)]),
                SqlUnit::new("DELETE FROM t WHERE v = ?", vec![SqlValue::Int(stmt as i64)]),
            ))
            .unwrap();
        }
    }

    let mut commit = TransactionEvent::commit(tx);
    c.on_transaction_event(&mut commit).unwrap();
    SagaDefinition::from_json(commit.plan_output.as_deref().unwrap()).unwrap()
}

fn assert_isolated(tx: &str, plan: &SagaDefinition) {
    assert_eq!(plan.requests.len(), STATEMENTS * SHARDS);
    assert!(plan.requests.iter().all(|r| r.id.starts_with(&format!("{}-", tx))));

    let levels = plan.execution_levels().unwrap();
    assert_eq!(levels.len(), STATEMENTS);
    assert!(levels.iter().all(|level| level.len() == SHARDS));
}

#[test]
fn test_interleaved_transactions_on_threads() {
    let c = Arc::new(SagaEventCoordinator::default());
    let threads = num_cpus::get().max(4) * 2;

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                let tx = format!("tx{}", i);
                let plan = run_transaction(&c, &tx);
                (tx, plan)
            })
        })
        .collect();

    for handle in handles {
        let (tx, plan) = handle.join().unwrap();
        assert_isolated(&tx, &plan);
    }
    assert_eq!(c.active_count(), 0);
}

#[test]
fn test_same_transaction_parallel_fan_out() {
    // Shard executions of one statement complete on different threads
    let c = Arc::new(SagaEventCoordinator::default());
    c.on_transaction_event(&mut TransactionEvent::begin("tx"))
        .unwrap();

    for stmt in 0..STATEMENTS {
        c.on_sql_execution_event(&SqlExecutionEvent::before_execute("tx"))
            .unwrap();
        thread::scope(|s| {
            for shard in 0..SHARDS {
                let c = &c;
                s.spawn(move || {
                    c.on_sql_execution_event(&SqlExecutionEvent::success(
                        "tx",
                        format!("{}-{}", stmt, shard),
                        format!("db{}", shard),
                        SqlUnit::new("UPDATE t SET v = v + 1", vec![]),
                        SqlUnit::new("UPDATE t SET v = v - 1", vec![]),
                    ))
                    .unwrap();
                });
            }
        });
    }

    let mut commit = TransactionEvent::commit("tx");
    let outcome = c.on_transaction_event(&mut commit).unwrap();
    assert_eq!(
        outcome,
        TransactionOutcome::Committed {
            nodes: STATEMENTS * SHARDS
        }
    );

    let plan = SagaDefinition::from_json(commit.plan_output.as_deref().unwrap()).unwrap();
    for request in &plan.requests {
        let stmt: usize = request.id.split('-').next().unwrap().parse().unwrap();
        let mut parents = request.parents.clone();
        parents.sort();
        let expected: Vec<String> = if stmt == 0 {
            vec![]
        } else {
            (0..SHARDS).map(|s| format!("{}-{}", stmt - 1, s)).collect()
        };
        assert_eq!(parents, expected, "request {}", request.id);
    }
}

#[test]
fn test_racing_terminal_event_never_mutates_consumed_graph() {
    for round in 0..50 {
        let c = Arc::new(SagaEventCoordinator::default());
        let tx = format!("race{}", round);
        c.on_transaction_event(&mut TransactionEvent::begin(tx.as_str()))
            .unwrap();

        let writer = {
            let c = Arc::clone(&c);
            let tx = tx.clone();
            thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..100 {
                    let event = SqlExecutionEvent::success(
                        tx.as_str(),
                        i.to_string(),
                        "db0",
                        SqlUnit::new("INSERT", vec![]),
                        SqlUnit::empty(),
                    );
                    match c.on_sql_execution_event(&event) {
                        Ok(_) => accepted += 1,
                        Err(e) => {
                            assert!(e.is_protocol_violation());
                            break;
                        }
                    }
                }
                accepted
            })
        };

        let mut commit = TransactionEvent::commit(tx.as_str());
        let outcome = c.on_transaction_event(&mut commit).unwrap();
        let accepted = writer.join().unwrap();

        // Everything accepted before finalization is in the plan, nothing after
        assert_eq!(outcome, TransactionOutcome::Committed { nodes: accepted });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_with_concurrent_senders() {
    let c = Arc::new(SagaEventCoordinator::default());
    let (sender, handle) = EventChannel::spawn(c.clone());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let sender = sender.clone();
            tokio::spawn(async move {
                let tx = format!("async{}", i);
                sender
                    .send_transaction(TransactionEvent::begin(tx.as_str()))
                    .await
                    .unwrap();
                sender
                    .send_sql_execution(SqlExecutionEvent::before_execute(tx.as_str()))
                    .await
                    .unwrap();
                sender
                    .send_sql_execution(SqlExecutionEvent::success(
                        tx.as_str(),
                        format!("{}-0", tx),
                        "db0",
                        SqlUnit::new("INSERT", vec![]),
                        SqlUnit::new("DELETE", vec![]),
                    ))
                    .await
                    .unwrap();
                let (event, _) = sender
                    .send_transaction(TransactionEvent::commit(tx.as_str()))
                    .await
                    .unwrap();
                (tx, event)
            })
        })
        .collect();

    for task in tasks {
        let (tx, event) = task.await.unwrap();
        let plan = SagaDefinition::from_json(event.plan_output.as_deref().unwrap()).unwrap();
        assert_eq!(plan.requests.len(), 1);
        assert_eq!(plan.requests[0].id, format!("{}-0", tx));
    }

    drop(sender);
    handle.await.unwrap();
    assert_eq!(c.active_count(), 0);
}

/// In-memory registry whose first `remove` parks right after the entry is gone
struct ParkingRegistry {
    inner: InMemoryTransactionRegistry,
    armed: AtomicBool,
    parked: Barrier,
}

impl ParkingRegistry {
    fn new() -> Self {
        Self {
            inner: InMemoryTransactionRegistry::default(),
            armed: AtomicBool::new(true),
            parked: Barrier::new(2),
        }
    }
}

impl TransactionRegistry for ParkingRegistry {
    fn begin(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        self.inner.begin(transaction_id)
    }

    fn get_for_mutation(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        self.inner.get_for_mutation(transaction_id)
    }

    fn remove(&self, transaction_id: &TransactionId) -> Result<BuilderHandle> {
        let removed = self.inner.remove(transaction_id);
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.wait();
            thread::sleep(Duration::from_millis(50));
        }
        removed
    }

    fn active_count(&self) -> usize {
        self.inner.active_count()
    }
}

#[test]
fn test_begin_during_terminal_removal_is_rejected() {
    for (terminal, retired_as) in [
        (TransactionEvent::commit("tx1"), TransactionState::Committed),
        (TransactionEvent::rollback("tx1"), TransactionState::RolledBack),
    ] {
        let registry = Arc::new(ParkingRegistry::new());
        let c = Arc::new(
            SagaEventCoordinator::with_registry(registry.clone(), CoordinatorSettings::default())
                .unwrap(),
        );
        c.on_transaction_event(&mut TransactionEvent::begin("tx1"))
            .unwrap();

        let terminating = {
            let c = Arc::clone(&c);
            let mut terminal = terminal;
            thread::spawn(move || c.on_transaction_event(&mut terminal).is_ok())
        };

        // The terminal event has removed the builder but may not have
        // recorded the id as retired yet
        registry.parked.wait();
        let err = c
            .on_transaction_event(&mut TransactionEvent::begin("tx1"))
            .unwrap_err();

        assert!(terminating.join().unwrap());
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(c.state(&TransactionId::from("tx1")), retired_as);
        assert_eq!(c.active_count(), 0);
    }
}
