//! Inbound event surface
//!
//! One listener trait per event category, implemented by the coordinator, and
//! an async adapter that drains a single ordered tokio channel into a
//! listener. Lifecycle and execution events share that channel so a BEGIN sent
//! before a BEFORE_EXECUTE is always applied first.
//!
//! The channel is bounded: once the draining task falls `capacity` events
//! behind, senders wait instead of queueing without limit.

use crate::coordinator::{ExecutionOutcome, SagaEventCoordinator, TransactionOutcome};
use crate::error::{Result, SagaError};
use crate::event::{SqlExecutionEvent, TransactionEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Receives BEGIN / COMMIT / ROLLBACK
pub trait TransactionListener: Send + Sync {
    fn listen(&self, event: &mut TransactionEvent) -> Result<TransactionOutcome>;
}

/// Receives BEFORE_EXECUTE / EXECUTE_SUCCESS / EXECUTE_FAILURE
pub trait SqlExecutionListener: Send + Sync {
    fn listen_sql_execution(&self, event: &SqlExecutionEvent) -> Result<ExecutionOutcome>;
}

impl TransactionListener for SagaEventCoordinator {
    fn listen(&self, event: &mut TransactionEvent) -> Result<TransactionOutcome> {
        self.on_transaction_event(event)
    }
}

impl SqlExecutionListener for SagaEventCoordinator {
    fn listen_sql_execution(&self, event: &SqlExecutionEvent) -> Result<ExecutionOutcome> {
        self.on_sql_execution_event(event)
    }
}

/// Lifecycle reply: the processed event (carrying the plan after COMMIT)
type TransactionReply = oneshot::Sender<Result<(TransactionEvent, TransactionOutcome)>>;

enum InboundEvent {
    Transaction {
        event: TransactionEvent,
        reply: Option<TransactionReply>,
    },
    SqlExecution(SqlExecutionEvent),
}

/// Queue depth used by `EventChannel::spawn`
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Cloneable sending half of an `EventChannel`
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<InboundEvent>,
}

impl EventSender {
    /// Send a lifecycle event and wait until it has been applied
    pub async fn send_transaction(
        &self,
        event: TransactionEvent,
    ) -> Result<(TransactionEvent, TransactionOutcome)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(InboundEvent::Transaction {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SagaError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SagaError::ChannelClosed)?
    }

    /// Queue a lifecycle event without waiting for the outcome
    pub async fn post_transaction(&self, event: TransactionEvent) -> Result<()> {
        self.tx
            .send(InboundEvent::Transaction { event, reply: None })
            .await
            .map_err(|_| SagaError::ChannelClosed)
    }

    /// Queue an execution event; failures are reported by the draining task
    pub async fn send_sql_execution(&self, event: SqlExecutionEvent) -> Result<()> {
        self.tx
            .send(InboundEvent::SqlExecution(event))
            .await
            .map_err(|_| SagaError::ChannelClosed)
    }

    /// Free queue slots right now
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Channel transport in front of a listener
pub struct EventChannel;

impl EventChannel {
    /// Spawn the draining task on the current tokio runtime with
    /// `DEFAULT_CHANNEL_CAPACITY`.
    ///
    /// The task exits once every `EventSender` clone has been dropped and the
    /// queue is empty.
    pub fn spawn<L>(listener: Arc<L>) -> (EventSender, JoinHandle<()>)
    where
        L: TransactionListener + SqlExecutionListener + 'static,
    {
        Self::with_capacity(listener, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Like `spawn` with an explicit queue depth (at least 1)
    pub fn with_capacity<L>(listener: Arc<L>, capacity: usize) -> (EventSender, JoinHandle<()>)
    where
        L: TransactionListener + SqlExecutionListener + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                match inbound {
                    InboundEvent::Transaction { mut event, reply } => {
                        let result = listener.listen(&mut event).map(|o| (event, o));
                        match reply {
                            Some(reply) => {
                                if reply.send(result).is_err() {
                                    debug!("Transaction event reply dropped by sender");
                                }
                            }
                            None => {
                                if let Err(e) = result {
                                    error!("Posted transaction event failed: {}", e);
                                }
                            }
                        }
                    }
                    InboundEvent::SqlExecution(event) => {
                        if let Err(e) = listener.listen_sql_execution(&event) {
                            warn!(
                                "SQL execution event {} for transaction {} failed: {}",
                                event.event_type, event.transaction_id, e
                            );
                        }
                    }
                }
            }
            debug!("Event channel closed, draining task exiting");
        });

        (EventSender { tx }, handle)
    }
}
