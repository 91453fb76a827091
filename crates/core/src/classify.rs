//! Single classification point for external tracker failures
//!
//! Every tracker call site funnels its error through [`classify_tracker_error`]
//! so the retry/terminal decision is made in exactly one place.

use leavesync_domain::TrackerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::workflow::StepError;

/// What a classified tracker failure means for the calling step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Park the instance and re-enter after the policy delay.
    Retry { reason: String },
    /// Terminal for the credential: fail the record, fire the one-shot
    /// notification, stop without retry.
    CredentialFailure { reason: String },
    /// Hard failure (the literal "request rate too large" 500): persist a
    /// Failed record, then abort.
    Hard { reason: String },
}

/// Map a classified client error to the action the workflow must take.
pub fn classify_tracker_error(err: &TrackerError) -> FailureAction {
    match err {
        TrackerError::Transient(reason) => FailureAction::Retry { reason: reason.clone() },
        TrackerError::InvalidCredential(reason) => {
            FailureAction::CredentialFailure { reason: reason.clone() }
        }
        TrackerError::RateExceeded(reason) => FailureAction::Hard { reason: reason.clone() },
    }
}

/// Memoizable result of a tracker call inside a step: either the value or a
/// credential failure the workflow resolves outside the step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "call", content = "value", rename_all = "snake_case")]
pub enum TrackerCall<T> {
    Done(T),
    CredentialFailure(String),
}

/// Fold a tracker result into a step outcome: transient failures raise the
/// retry signal, hard failures abort, credential failures become values the
/// workflow body settles.
pub fn tracker_step<T>(
    result: std::result::Result<T, TrackerError>,
) -> std::result::Result<TrackerCall<T>, StepError>
where
    T: Serialize + DeserializeOwned,
{
    match result {
        Ok(value) => Ok(TrackerCall::Done(value)),
        Err(err) => match classify_tracker_error(&err) {
            FailureAction::Retry { reason } => Err(StepError::Retry { reason }),
            FailureAction::CredentialFailure { reason } => {
                Ok(TrackerCall::CredentialFailure(reason))
            }
            FailureAction::Hard { reason } => Err(StepError::Fatal(reason)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_retry() {
        let action = classify_tracker_error(&TrackerError::Transient("503".into()));
        assert_eq!(action, FailureAction::Retry { reason: "503".into() });
    }

    #[test]
    fn credential_failures_are_terminal_without_retry() {
        let action = classify_tracker_error(&TrackerError::InvalidCredential("401".into()));
        assert_eq!(action, FailureAction::CredentialFailure { reason: "401".into() });
    }

    #[test]
    fn rate_exceeded_is_hard_not_transient() {
        let action =
            classify_tracker_error(&TrackerError::RateExceeded("request rate too large".into()));
        assert_eq!(action, FailureAction::Hard { reason: "request rate too large".into() });
    }

    #[test]
    fn tracker_step_folds_results() {
        let ok: Result<TrackerCall<String>, StepError> = tracker_step(Ok("id-1".to_string()));
        assert_eq!(ok.unwrap(), TrackerCall::Done("id-1".to_string()));

        let retry = tracker_step::<String>(Err(TrackerError::Transient("429".into())));
        assert!(matches!(retry, Err(StepError::Retry { .. })));

        let cred = tracker_step::<String>(Err(TrackerError::InvalidCredential("401".into())));
        assert_eq!(cred.unwrap(), TrackerCall::CredentialFailure("401".into()));

        let hard = tracker_step::<String>(Err(TrackerError::RateExceeded("too large".into())));
        assert!(matches!(hard, Err(StepError::Fatal(_))));
    }
}
