use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("role template not found: {0}")]
    TemplateNotFound(String),
    #[error("role template cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("{kind} {name} kept changing underneath the update")]
    Conflict { kind: &'static str, name: String },
    #[error("failed to {action} {kind} {name} in {scope}")]
    Store {
        action: &'static str,
        kind: &'static str,
        name: String,
        scope: String,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn store(
        action: &'static str,
        kind: &'static str,
        name: impl Into<String>,
        scope: impl Into<String>,
        source: StoreError,
    ) -> Self {
        ReconcileError::Store {
            action,
            kind,
            name: name.into(),
            scope: scope.into(),
            source,
        }
    }

    /// Whether redelivering the same event may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Conflict { .. } => true,
            ReconcileError::Store { source, .. } => source.is_retryable(),
            ReconcileError::TemplateNotFound(_) | ReconcileError::Cycle(_) => false,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Keeps the first failure of a batch of independent operations.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<ReconcileError>);

impl FirstError {
    pub(crate) fn record(&mut self, err: ReconcileError) {
        if self.0.is_none() {
            self.0 = Some(err);
        }
    }

    pub(crate) fn into_result(self) -> ReconcileResult<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cycle_message_lists_path() {
        let err = ReconcileError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "role template cycle: a -> b -> a");
    }

    #[test]
    fn timeouts_are_retryable_but_missing_templates_are_not() {
        let err = ReconcileError::store(
            "get",
            "ClusterRole",
            "view",
            "cluster",
            StoreError::Timeout(Duration::from_millis(5)),
        );
        assert!(err.is_retryable());
        assert!(!ReconcileError::TemplateNotFound("x".into()).is_retryable());
    }

    #[test]
    fn first_error_wins() {
        let mut first = FirstError::default();
        first.record(ReconcileError::TemplateNotFound("a".into()));
        first.record(ReconcileError::TemplateNotFound("b".into()));
        let err = first.into_result().expect_err("error");
        assert!(matches!(err, ReconcileError::TemplateNotFound(name) if name == "a"));
    }
}
