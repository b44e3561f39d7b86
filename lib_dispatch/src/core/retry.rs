//! # Retry Policy
//!
//! Classifies the outcome of each transport attempt and drives exponential
//! backoff for the transient ones.
//!
//! | outcome                                   | verdict                      |
//! |-------------------------------------------|------------------------------|
//! | timeout / connection failure              | transient                    |
//! | request could not be built                | terminal, `InvalidRequest`   |
//! | 5xx                                       | transient                    |
//! | 401 / 403 (HTTP or business code)         | terminal, `Auth`             |
//! | other non-2xx                             | terminal, `Http`             |
//! | 2xx with a non-success business code      | terminal, `Business`         |
//! | 2xx with a non-integer business code      | terminal, `Business`         |
//! | 2xx otherwise                             | success                      |
//!
//! A business code that is present but not an integer (`"E1001"`, `true`,
//! `1.5`) is reported under [`MALFORMED_BUSINESS_CODE`] with the body kept
//! verbatim. Only a missing or `null` field counts as success.
//!
//! Retry *n* (1-indexed) waits `2^(n-1) * base_delay`. After `max_retries`
//! retries the last transient failure becomes a `Network` error.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use super::error::{DispatchError, TransportError};
use super::transport::TransportResponse;

/// Code reported for a business status field that is not an integer.
pub const MALFORMED_BUSINESS_CODE: i64 = -7;

/// How to recognise an application level failure inside a 2xx body.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessRules {
    /// Name of the status field in the response object.
    pub code_field: String,
    /// Codes that mean success. A body without the field is always a success.
    pub success_codes: Vec<i64>,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            code_field: "code".to_string(),
            success_codes: vec![0],
        }
    }
}

enum BusinessCode {
    Absent,
    Code(i64),
    Malformed,
}

impl BusinessRules {
    fn business_code(&self, body: &Value) -> BusinessCode {
        let parsed = match body.get(&self.code_field) {
            None | Some(Value::Null) => return BusinessCode::Absent,
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        parsed.map_or(BusinessCode::Malformed, BusinessCode::Code)
    }
}

fn backend_message(body: &Value) -> String {
    ["msg", "message", "error"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn is_auth_status(code: i64) -> bool {
    code == 401 || code == 403
}

/// Verdict for one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Resolve with this response.
    Success(TransportResponse),
    /// Worth retrying. Carries a description of the failure.
    Transient(String),
    /// Stop and reject.
    Terminal(DispatchError),
}

/// Exponential backoff retry driver.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    rules: BusinessRules,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), BusinessRules::default())
    }
}

impl RetryPolicy {
    /// Creates a policy with the given base delay and business rules.
    pub fn new(base_delay: Duration, rules: BusinessRules) -> Self {
        Self { base_delay, rules }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Classifies a single attempt.
    pub fn classify(&self, result: Result<TransportResponse, TransportError>) -> AttemptOutcome {
        let response = match result {
            Ok(response) => response,
            Err(TransportError::Invalid(reason)) => {
                return AttemptOutcome::Terminal(DispatchError::InvalidRequest(reason))
            }
            Err(e) => return AttemptOutcome::Transient(e.to_string()),
        };

        let status = response.status;
        if is_auth_status(i64::from(status)) {
            return AttemptOutcome::Terminal(DispatchError::Auth { status });
        }
        if (500..600).contains(&status) {
            return AttemptOutcome::Transient(format!("HTTP {}", status));
        }
        if !(200..300).contains(&status) {
            return AttemptOutcome::Terminal(DispatchError::Http {
                status,
                body: response.body,
            });
        }

        let code = match self.rules.business_code(&response.body) {
            BusinessCode::Absent => return AttemptOutcome::Success(response),
            BusinessCode::Code(code) if is_auth_status(code) => {
                return AttemptOutcome::Terminal(DispatchError::Auth { status: code as u16 })
            }
            BusinessCode::Code(code) if self.rules.success_codes.contains(&code) => {
                return AttemptOutcome::Success(response)
            }
            BusinessCode::Code(code) => code,
            BusinessCode::Malformed => MALFORMED_BUSINESS_CODE,
        };
        AttemptOutcome::Terminal(DispatchError::Business {
            code,
            message: backend_message(&response.body),
            payload: response.body,
        })
    }

    /// Runs `attempt` until it succeeds, fails terminally, or `1 + max_retries`
    /// attempts have been made.
    pub async fn run<F, Fut>(&self, max_retries: u32, mut attempt: F) -> Result<TransportResponse, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TransportResponse, TransportError>>,
    {
        let mut made = 0u32;
        loop {
            made += 1;
            match self.classify(attempt().await) {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Terminal(err) => return Err(err),
                AttemptOutcome::Transient(reason) => {
                    if made > max_retries {
                        log::warn!("Giving up after {} attempt(s): {}", made, reason);
                        return Err(DispatchError::Network {
                            attempts: made,
                            message: reason,
                        });
                    }
                    let delay = self.backoff(made);
                    log::info!(
                        "Attempt {} failed ({}), retrying in {} ms",
                        made,
                        reason,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
