use thiserror::Error;

use crate::error::RemoteError;
use crate::model::external_id::ExternalId;
use crate::model::mapping::{same_state, StateChain};
use crate::providers::RemoteAdapter;
use crate::retry::{RetryError, RetryExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The item was already in the chain's final state.
    AlreadyInState,
    /// States applied, in order.
    Transitioned { hops: Vec<String> },
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("{id}: no transition from '{from}' to '{target}' (valid: {valid:?}, rolled back: {rolled_back})")]
    Unreachable {
        id: String,
        from: String,
        target: String,
        valid: Vec<String>,
        rolled_back: bool,
    },

    #[error(transparent)]
    Remote(#[from] RetryError<RemoteError>),
}

impl TransitionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote(e) if e.last.is_not_found())
    }
}

/// How each remote call inside a transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopRetry {
    /// Use the engine's retry executor.
    Steady,
    /// One attempt per call. Used right after creating an item.
    Once,
}

/// Moves a remote item along a state chain one validated hop at a time,
/// walking back to the starting state if a hop cannot be made.
pub struct WorkflowTransitioner<'a> {
    adapter: &'a dyn RemoteAdapter,
    retry: RetryExecutor,
}

impl<'a> WorkflowTransitioner<'a> {
    pub fn new(adapter: &'a dyn RemoteAdapter, retry: RetryExecutor, mode: HopRetry) -> Self {
        let retry = match mode {
            HopRetry::Steady => retry,
            HopRetry::Once => RetryExecutor::once(),
        };
        Self { adapter, retry }
    }

    pub async fn run(
        &self,
        id: &ExternalId,
        chain: &StateChain,
    ) -> Result<TransitionOutcome, TransitionError> {
        let adapter = self.adapter;
        let item = self
            .retry
            .attempt("fetch item", move || adapter.fetch(id))
            .await?;
        if chain.ends_at(&item.state) {
            tracing::debug!(item = %id, state = %item.state, "already in target state");
            return Ok(TransitionOutcome::AlreadyInState);
        }

        // path[0] is the starting state; every later entry is an applied hop.
        let mut path = vec![item.state.clone()];
        for target in chain.remaining_after(&item.state) {
            let current = match self
                .retry
                .attempt("fetch item", move || adapter.fetch(id))
                .await
            {
                Ok(current) => current,
                Err(e) => {
                    self.roll_back(id, &path).await;
                    return Err(e.into());
                }
            };
            if current.is_in_state(target) {
                path.push(target.clone());
                continue;
            }

            let valid = match self
                .retry
                .attempt("list transitions", move || adapter.list_valid_transitions(id))
                .await
            {
                Ok(valid) => valid,
                Err(e) => {
                    self.roll_back(id, &path).await;
                    return Err(e.into());
                }
            };
            if !valid.iter().any(|s| same_state(s, target)) {
                let rolled_back = self.roll_back(id, &path).await;
                return Err(TransitionError::Unreachable {
                    id: id.to_string(),
                    from: current.state,
                    target: target.clone(),
                    valid,
                    rolled_back,
                });
            }

            let state: &str = target;
            match self
                .retry
                .attempt("transition", move || adapter.transition(id, state))
                .await
            {
                Ok(()) => {
                    tracing::debug!(item = %id, from = %current.state, to = %target, "transitioned");
                    path.push(target.clone());
                }
                Err(e) => {
                    self.roll_back(id, &path).await;
                    return Err(e.into());
                }
            }
        }

        Ok(TransitionOutcome::Transitioned {
            hops: path.split_off(1),
        })
    }

    /// Undo applied hops in reverse order. Returns false if any reverse hop failed.
    async fn roll_back(&self, id: &ExternalId, path: &[String]) -> bool {
        if path.len() < 2 {
            return true;
        }
        let adapter = self.adapter;
        for state in path[..path.len() - 1].iter().rev() {
            let state: &str = state;
            if let Err(e) = self
                .retry
                .attempt("roll back", move || adapter.transition(id, state))
                .await
            {
                tracing::warn!(item = %id, to = state, error = %e, "rollback incomplete");
                return false;
            }
        }
        tracing::info!(item = %id, to = %path[0], "rolled back to original state");
        true
    }
}
