// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry and backoff policy for link resolution and chunk downloads.
//!
//! Failures are classified before deciding anything:
//!
//! | Failure | Class | Budget |
//! |---|---|---|
//! | HTTP 503 | `TemporarilyUnavailable` | attempts + `temporarily_unavailable_retry_timeout` |
//! | HTTP 429 | `RateLimited` | attempts + `rate_limit_retry_timeout` |
//! | HTTP 408, other 5xx | `ServerError` | attempts |
//! | connect / reset / timeout | `Connection` | attempts |
//! | other 4xx, decompression, parse | fatal | none |
//!
//! A numeric `Retry-After` header is used as the wait before the next attempt.
//! Otherwise the wait is `base_delay * 2^(n-1)` clamped to `max_delay`, plus jitter,
//! where `n` counts retries of the same class. Counters live in a [`RetryContext`]
//! created per call, so concurrent downloads never share budgets.

use crate::error::{Error, Result};
use rand::Rng;
use reqwest::Method;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    TemporarilyUnavailable,
    RateLimited,
    ServerError,
    Connection,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry HTTP 503 responses.
    pub retry_temporarily_unavailable: bool,
    /// Retry HTTP 429 responses.
    pub retry_rate_limited: bool,
    /// Cumulative wait allowed for 503 retries.
    pub temporarily_unavailable_retry_timeout: Duration,
    /// Cumulative wait allowed for 429 retries.
    pub rate_limit_retry_timeout: Duration,
    /// Maximum retries per failure class.
    pub max_attempts_per_class: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub max_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_temporarily_unavailable: true,
            retry_rate_limited: true,
            temporarily_unavailable_retry_timeout: Duration::from_secs(900),
            rate_limit_retry_timeout: Duration::from_secs(120),
            max_attempts_per_class: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_jitter) {
            return Err(Error::InvalidConfig(format!(
                "retry max_jitter must be within [0, 1], got {}",
                self.max_jitter
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::InvalidConfig(format!(
                "retry base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Only GET, PUT and POST are retried.
pub fn is_method_retryable(method: &Method) -> bool {
    *method == Method::GET || *method == Method::PUT || *method == Method::POST
}

/// Map an error to its retry class, or `None` if it must not be retried.
pub fn classify(error: &Error, config: &RetryConfig) -> Option<FailureClass> {
    match error {
        Error::Http { status: 503, .. } if config.retry_temporarily_unavailable => {
            Some(FailureClass::TemporarilyUnavailable)
        }
        Error::Http { status: 429, .. } if config.retry_rate_limited => {
            Some(FailureClass::RateLimited)
        }
        Error::Http { status: 503, .. } | Error::Http { status: 429, .. } => None,
        Error::Http { status: 408, .. } => Some(FailureClass::ServerError),
        Error::Http { status, .. } if (500..600).contains(status) => {
            Some(FailureClass::ServerError)
        }
        Error::Transport(_) => Some(FailureClass::Connection),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ClassBudget {
    retries: u32,
    waited: Duration,
}

/// Attempt counters for a single logical operation.
#[derive(Debug, Default)]
pub struct RetryContext {
    budgets: HashMap<FailureClass, ClassBudget>,
    attempts: u32,
    waited: Duration,
}

impl RetryContext {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self, class: FailureClass) -> u32 {
        self.budgets.get(&class).map(|b| b.retries).unwrap_or(0)
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}

#[derive(Debug)]
pub enum RetryDecision {
    Retry { class: FailureClass, delay: Duration },
    GiveUp(Error),
}

/// Result of a retried operation plus how much retrying it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub waited: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff for the `retry`-th retry of a class (1-based), before jitter.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.max_jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.config.max_jitter);
        delay + delay.mul_f64(fraction)
    }

    fn time_budget(&self, class: FailureClass) -> Option<Duration> {
        match class {
            FailureClass::TemporarilyUnavailable => {
                Some(self.config.temporarily_unavailable_retry_timeout)
            }
            FailureClass::RateLimited => Some(self.config.rate_limit_retry_timeout),
            FailureClass::ServerError | FailureClass::Connection => None,
        }
    }

    /// Decide what to do after attempt `ctx.attempts()` failed with `error`.
    pub fn decide(&self, method: &Method, ctx: &mut RetryContext, error: Error) -> RetryDecision {
        if !is_method_retryable(method) {
            debug!("Not retrying {} request: {}", method, error);
            return RetryDecision::GiveUp(error);
        }
        let Some(class) = classify(&error, &self.config) else {
            debug!("Not retrying non-retryable error: {}", error);
            return RetryDecision::GiveUp(error);
        };

        let budget = ctx.budgets.entry(class).or_default();
        let exhausted = |budget: &ClassBudget, error: Error| {
            warn!(
                "Retry budget for {:?} exhausted after {} attempts ({:?} waited): {}",
                class, ctx.attempts, budget.waited, error
            );
            RetryDecision::GiveUp(Error::RetryBudgetExhausted {
                class,
                attempts: ctx.attempts,
                waited: budget.waited,
                source: Box::new(error),
            })
        };

        if budget.retries >= self.config.max_attempts_per_class {
            return exhausted(budget, error);
        }

        let retry_after = match &error {
            Error::Http { retry_after, .. } => *retry_after,
            _ => None,
        };
        let delay = match retry_after {
            Some(wait) => wait,
            None => self.jittered(self.backoff_delay(budget.retries + 1)),
        };

        if let Some(limit) = self.time_budget(class) {
            if budget.waited + delay > limit {
                return exhausted(budget, error);
            }
        }

        budget.retries += 1;
        budget.waited += delay;
        ctx.waited += delay;
        RetryDecision::Retry { class, delay }
    }

    /// Run `op` until it succeeds, fails fatally, or a budget runs out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        method: &Method,
        cancel: &CancellationToken,
        op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_observed(method, cancel, |_, _, _| {}, op).await
    }

    /// Like [`execute`](Self::execute), calling `observer(class, failed_attempt, delay)`
    /// before each retry sleep.
    pub async fn execute_observed<T, F, Fut, O>(
        &self,
        method: &Method,
        cancel: &CancellationToken,
        mut observer: O,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(FailureClass, u32, Duration),
    {
        let mut ctx = RetryContext::default();

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(Error::Cancelled),
                    attempts: ctx.attempts,
                    waited: ctx.waited,
                };
            }

            ctx.attempts += 1;
            let attempt = ctx.attempts;
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = op(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        waited: ctx.waited,
                    }
                }
                Err(Error::Cancelled) => {
                    return RetryOutcome {
                        result: Err(Error::Cancelled),
                        attempts: attempt,
                        waited: ctx.waited,
                    }
                }
                Err(e) => e,
            };

            let message = error.to_string();
            match self.decide(method, &mut ctx, error) {
                RetryDecision::GiveUp(error) => {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        waited: ctx.waited,
                    }
                }
                RetryDecision::Retry { class, delay } => {
                    warn!(
                        "Attempt {} failed ({:?}): {}, retrying in {:?}",
                        attempt, class, message, delay
                    );
                    observer(class, attempt, delay);

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return RetryOutcome {
                                result: Err(Error::Cancelled),
                                attempts: attempt,
                                waited: ctx.waited,
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
