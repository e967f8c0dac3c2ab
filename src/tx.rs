use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::repo::{Session, Store};

/// Early exit decided inside a unit of work. The transaction still commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    NotFound,
    Conflict,
}

#[derive(Debug, PartialEq)]
pub enum Flow<T> {
    Done(T),
    Halt(Halt),
}

impl<T> Flow<T> {
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            Flow::Done(v) => Ok(v),
            Flow::Halt(Halt::NotFound) => Err(ServiceError::NotFound),
            Flow::Halt(Halt::Conflict) => Err(ServiceError::Conflict),
        }
    }
}

pub type UnitResult<T> = Result<Flow<T>, ServiceError>;

/// Runs units of work against one store, each inside its own transaction.
#[derive(Clone)]
pub struct TxCoordinator {
    store: Arc<dyn Store>,
}

impl TxCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub fn store(&self) -> &Arc<dyn Store> { &self.store }

    /// `Err` rolls back every write made through the session; any `Ok` commits.
    pub async fn run<T, F>(&self, work: F) -> UnitResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn Session) -> BoxFuture<'s, UnitResult<T>>,
    {
        let mut tx = self.store.begin().await?;
        let outcome = work(tx.session()).await;
        match outcome {
            Ok(flow) => {
                if let Flow::Halt(halt) = &flow {
                    debug!(?halt, "unit of work halted");
                }
                tx.commit().await?;
                Ok(flow)
            }
            Err(e) => {
                debug!(error = %e, "rolling back unit of work");
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
