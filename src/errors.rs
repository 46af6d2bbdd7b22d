use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::error;

use crate::db::StoreError;
use crate::identity::EntityType;
use crate::notices::{NoticeLevel, Notices};
use crate::state::WatchState;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("persistence task did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("'{state}' is not a valid state for a {kind}")]
    InvalidState { kind: EntityType, state: WatchState },
    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StateError {
    pub fn needs_reload(&self) -> bool {
        matches!(self, Self::Store(err) if err.needs_reload())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct HandleOptions<T> {
    context: String,
    toast: Option<String>,
    rethrow: bool,
    dedupe_key: Option<String>,
    fallback: T,
}

impl<T> HandleOptions<T> {
    pub fn new(context: impl Into<String>, fallback: T) -> Self {
        Self {
            context: context.into(),
            toast: None,
            rethrow: false,
            dedupe_key: None,
            fallback,
        }
    }

    pub fn toast(mut self, message: impl Into<String>) -> Self {
        self.toast = Some(message.into());
        self
    }

    pub fn rethrow(mut self) -> Self {
        self.rethrow = true;
        self
    }

    pub fn dedupe(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Single failure policy for the repository boundary: log, tell the user,
/// then fall back or rethrow.
pub struct ErrorHandler {
    notices: Arc<dyn Notices>,
    reported: Mutex<HashSet<String>>,
}

impl ErrorHandler {
    pub fn new(notices: Arc<dyn Notices>) -> Self {
        Self {
            notices,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn notices(&self) -> &Arc<dyn Notices> {
        &self.notices
    }

    pub fn handle<T>(&self, err: StateError, opts: HandleOptions<T>) -> Result<T, StateError> {
        let first_report = match &opts.dedupe_key {
            Some(key) => lock(&self.reported).insert(key.clone()),
            None => true,
        };

        if first_report {
            error!(context = %opts.context, error = %err, "operation failed");
            if err.needs_reload() {
                self.notices.request_reload(&err.to_string());
            } else if let Some(message) = &opts.toast {
                self.notices.toast(NoticeLevel::Error, message);
            }
        }

        if opts.rethrow {
            Err(err)
        } else {
            Ok(opts.fallback)
        }
    }
}
