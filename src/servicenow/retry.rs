use crate::constants::retry as retry_constants;
use crate::errors::ErrorType;
use reqwest::Method;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retryable: HashSet<ErrorType>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Methods safe to resend. A POST that timed out may already have run on
    /// the instance, so it is never repeated.
    pub methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: retry_constants::MAX_RETRIES,
            retryable: ErrorType::ALL
                .iter()
                .copied()
                .filter(|t| t.is_transient())
                .collect(),
            initial_delay: Duration::from_millis(retry_constants::INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(retry_constants::MAX_DELAY_MS),
            backoff_multiplier: retry_constants::BACKOFF_MULTIPLIER,
            methods: vec![
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::PUT,
                Method::DELETE,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retryable(mut self, types: &[ErrorType]) -> Self {
        self.retryable = types.iter().copied().collect();
        self
    }

    pub fn is_retryable(&self, error_type: ErrorType) -> bool {
        self.retryable.contains(&error_type)
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let factor = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let mut delay = base * factor.powi(retry.saturating_sub(1) as i32);
        let cap = self.max_delay.as_millis() as f64;
        if !delay.is_finite() || delay > cap {
            delay = cap;
        }
        Duration::from_millis(delay.max(0.0) as u64)
    }
}
