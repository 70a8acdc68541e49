use crate::errors::ServiceNowError;
use serde::Serialize;
use std::future::Future;

#[derive(Debug, Clone)]
pub struct ProbeOutcome<T> {
    pub value: T,
    pub candidate: String,
    pub attempted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeFailure {
    pub attempted: Vec<String>,
    /// Error that stopped the walk early, or the last miss when every
    /// candidate was tried.
    pub last_error: Option<ServiceNowError>,
    pub aborted: bool,
}

impl ProbeFailure {
    /// A hard failure is returned as-is; an exhausted walk becomes
    /// `TABLE_NOT_ACCESSIBLE` listing every candidate tried.
    pub fn into_error(self, message: impl Into<String>) -> ServiceNowError {
        if self.aborted {
            if let Some(err) = self.last_error {
                return err;
            }
        }
        ServiceNowError::table_not_accessible(message).with_details(serde_json::json!({
            "attempted": self.attempted,
            "last_error": self.last_error.map(|e| e.message),
        }))
    }
}

/// Ordered list of alternatives (tables, endpoints) tried until one answers.
/// Misses such as "table not found" or "ACL denied" move on to the next
/// candidate; anything else (auth, instance down) stops the walk.
pub struct CandidateProbe<'a> {
    candidates: Vec<&'a str>,
}

impl<'a> CandidateProbe<'a> {
    pub fn new(candidates: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
        }
    }

    pub async fn first_success<T, F, Fut>(&self, mut attempt: F) -> Result<ProbeOutcome<T>, ProbeFailure>
    where
        F: FnMut(&'a str) -> Fut,
        Fut: Future<Output = Result<T, ServiceNowError>>,
    {
        let mut attempted = Vec::new();
        let mut last_error = None;
        for candidate in &self.candidates {
            attempted.push(candidate.to_string());
            match attempt(*candidate).await {
                Ok(value) => {
                    return Ok(ProbeOutcome {
                        value,
                        candidate: candidate.to_string(),
                        attempted,
                    })
                }
                Err(err) if err.error_type.is_surface_miss() => last_error = Some(err),
                Err(err) => {
                    return Err(ProbeFailure {
                        attempted,
                        last_error: Some(err),
                        aborted: true,
                    })
                }
            }
        }
        Err(ProbeFailure {
            attempted,
            last_error,
            aborted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorType;

    #[tokio::test]
    async fn first_success_wins_after_misses() {
        let probe = CandidateProbe::new(["a", "b", "c"]);
        let outcome = probe
            .first_success(|candidate| async move {
                match candidate {
                    "a" => Err(ServiceNowError::table_not_accessible("missing")),
                    other => Ok(other.to_uppercase()),
                }
            })
            .await
            .expect("outcome");
        assert_eq!(outcome.value, "B");
        assert_eq!(outcome.candidate, "b");
        assert_eq!(outcome.attempted, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn hard_failures_stop_the_walk() {
        let probe = CandidateProbe::new(["a", "b"]);
        let failure = probe
            .first_success(|_| async { Err::<(), _>(ServiceNowError::authentication_failed("bad")) })
            .await
            .expect_err("aborted");
        assert!(failure.aborted);
        assert_eq!(failure.attempted, vec!["a"]);
        assert_eq!(
            failure.last_error.map(|e| e.error_type),
            Some(ErrorType::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn exhausted_candidates_report_every_attempt() {
        let probe = CandidateProbe::new(["a", "b"]);
        let failure = probe
            .first_success(|_| async { Err::<(), _>(ServiceNowError::acl_denied("no")) })
            .await
            .expect_err("exhausted");
        assert!(!failure.aborted);
        assert_eq!(failure.attempted, vec!["a", "b"]);
        let err = failure.into_error("nothing answered");
        assert_eq!(err.error_type, ErrorType::TableNotAccessible);
        assert_eq!(err.details.expect("details")["attempted"][1], "b");
    }
}
