//! Retry policy with typed backoff.
//!
//! The policy is a pure decision function plus a cancellable delay. Given a
//! [`RetryContext`] describing the last failure, [`RetryPolicy::should_retry`]
//! answers three questions in order: may we retry at all (cancellation,
//! attempt budget, status allowlist), how long must we wait (vendor
//! `Retry-After` wins over computed backoff), and why (the reason string
//! cites whichever source produced the delay).
//!
//! Configuration is validated both on construction and on
//! [`RetryPolicy::update_config`], so an in-flight decision never observes a
//! half-valid config.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationHandle;
use crate::error::{CancelStage, Error, Result};
use crate::transport::HttpResponse;

/// Delay growth strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay_ms × multiplier^attempt`
    Exponential,
    /// `base_delay_ms × (attempt + 1)`
    Linear,
}

/// Validated retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Maximum retry attempts, in `[0, 10]`.
    pub attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay_ms: u64,
    /// Upper bound for any computed or header-derived delay. Must be at
    /// least `base_delay_ms`.
    pub max_delay_ms: u64,
    /// Exponential growth factor; must be positive.
    pub multiplier: f64,
    /// Multiply the delay by a uniform sample in `[0.5, 1.5]`.
    pub jitter: bool,
    /// HTTP statuses eligible for retry, each in `[100, 599]`.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempts > 10 {
            return Err(Error::validation("retry attempts must be in [0, 10]"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::validation(
                "max_delay_ms must be at least base_delay_ms",
            ));
        }
        if self.multiplier <= 0.0 {
            return Err(Error::validation("backoff multiplier must be positive"));
        }
        for code in &self.retryable_status_codes {
            if !(100..=599).contains(code) {
                return Err(Error::validation(format!(
                    "retryable status code out of range: {code}"
                )));
            }
        }
        Ok(())
    }
}

/// State handed to the decision function after a failed attempt.
pub struct RetryContext<'a> {
    /// 0-based attempt number of the attempt that just failed.
    pub attempt: u32,
    pub last_error: &'a Error,
    pub last_response: Option<&'a HttpResponse>,
    pub cancel: &'a CancellationHandle,
}

/// Outcome of one retry decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
    pub reason: String,
}

impl RetryDecision {
    fn no(reason: impl Into<String>) -> Self {
        Self {
            retry: false,
            delay_ms: 0,
            reason: reason.into(),
        }
    }
}

/// Retry policy shared across calls. Reads take a snapshot of the config so
/// `update_config` never interleaves with an in-flight decision.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RwLock<RetryPolicyConfig>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default()).expect("default config is valid")
    }
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
        })
    }

    /// Replace the configuration; rejects invalid values.
    pub fn update_config(&self, config: RetryPolicyConfig) -> Result<()> {
        config.validate()?;
        *self.config.write().expect("retry config lock") = config;
        Ok(())
    }

    pub fn config(&self) -> RetryPolicyConfig {
        self.config.read().expect("retry config lock").clone()
    }

    /// Decide whether and when to retry.
    pub fn should_retry(&self, ctx: &RetryContext<'_>) -> RetryDecision {
        let config = self.config();

        if ctx.cancel.is_cancelled() {
            return RetryDecision::no("call was cancelled");
        }
        if ctx.attempt >= config.attempts {
            return RetryDecision::no(format!(
                "attempt budget exhausted ({} of {})",
                ctx.attempt, config.attempts
            ));
        }
        if !ctx.last_error.is_retryable() {
            return RetryDecision::no(format!("error is not retryable: {}", ctx.last_error));
        }
        if let Some(response) = ctx.last_response {
            if !config.retryable_status_codes.contains(&response.status) {
                return RetryDecision::no(format!(
                    "status {} not in retryable set",
                    response.status
                ));
            }
            if let Some(value) = response.header("retry-after") {
                if let Some(delay_ms) = parse_retry_after(value) {
                    let capped = delay_ms.min(config.max_delay_ms);
                    return RetryDecision {
                        retry: true,
                        delay_ms: capped,
                        reason: format!("retry-after header requested {delay_ms}ms"),
                    };
                }
            }
        }

        let delay_ms = compute_backoff(&config, ctx.attempt);
        RetryDecision {
            retry: true,
            delay_ms,
            reason: format!(
                "{} backoff for attempt {}",
                match config.backoff {
                    BackoffStrategy::Exponential => "exponential",
                    BackoffStrategy::Linear => "linear",
                },
                ctx.attempt
            ),
        }
    }

    /// Sleep for `delay_ms`, aborting early if `cancel` fires. The timer is
    /// dropped on both paths.
    pub async fn delay(&self, delay_ms: u64, cancel: &CancellationHandle) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
            _ = cancel.cancelled() => Err(Error::cancelled(CancelStage::RetryDelay)),
        }
    }
}

/// Compute the pre-header backoff delay for `attempt`, jittered and capped.
fn compute_backoff(config: &RetryPolicyConfig, attempt: u32) -> u64 {
    // Attempts past 32 would overflow any sane multiplier.
    let attempt = attempt.min(32);
    let base = config.base_delay_ms as f64;
    let raw = match config.backoff {
        BackoffStrategy::Exponential => base * config.multiplier.powi(attempt as i32),
        BackoffStrategy::Linear => base * (attempt as f64 + 1.0),
    };
    let capped = raw.min(config.max_delay_ms as f64);
    let jittered = if config.jitter {
        capped * (0.5 + rand::random::<f64>())
    } else {
        capped
    };
    jittered.min(config.max_delay_ms as f64).max(0.0) as u64
}

/// Parse a `Retry-After` value: nonnegative integer seconds, or an HTTP-date.
/// Future dates yield the remaining wait; past dates yield 0. Returns the
/// delay in milliseconds.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds * 1000);
    }
    let date = parse_http_date(value)?;
    match date.duration_since(SystemTime::now()) {
        Ok(remaining) => Some(remaining.as_millis() as u64),
        Err(_) => Some(0),
    }
}

/// Parse an RFC 1123 date such as `Sun, 06 Nov 1994 08:49:37 GMT`.
fn parse_http_date(value: &str) -> Option<SystemTime> {
    let rest = value.split_once(", ").map(|(_, r)| r).unwrap_or(value);
    let mut fields = rest.split_whitespace();
    let day: u64 = fields.next()?.parse().ok()?;
    let month = match fields.next()? {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let year: i64 = fields.next()?.parse().ok()?;
    let mut clock = fields.next()?.split(':');
    let hour: u64 = clock.next()?.parse().ok()?;
    let minute: u64 = clock.next()?.parse().ok()?;
    let second: u64 = clock.next()?.parse().ok()?;
    if fields.next()? != "GMT" {
        return None;
    }
    if day == 0 || day > 31 || hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let days = days_from_civil(year, month, day as i64);
    if days < 0 {
        return None;
    }
    let secs = days as u64 * 86_400 + hour * 3600 + minute * 60 + second;
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (month + if month > 2 { -3 } else { 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn response_with_status(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    fn response_with_retry_after(value: &str) -> HttpResponse {
        let mut response = response_with_status(429);
        response
            .headers
            .insert("retry-after".to_string(), value.to_string());
        response
    }

    fn no_jitter_config() -> RetryPolicyConfig {
        RetryPolicyConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryPolicyConfig::default().validate().is_ok());
        assert!(
            RetryPolicyConfig {
                attempts: 11,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            RetryPolicyConfig {
                base_delay_ms: 5000,
                max_delay_ms: 1000,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            RetryPolicyConfig {
                multiplier: 0.0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            RetryPolicyConfig {
                retryable_status_codes: vec![600],
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let policy = RetryPolicy::default();
        assert!(
            policy
                .update_config(RetryPolicyConfig {
                    attempts: 99,
                    ..Default::default()
                })
                .is_err()
        );
        // Old config still in effect.
        assert_eq!(policy.config().attempts, 3);
    }

    #[test]
    fn test_cancelled_stops_retry() {
        let policy = RetryPolicy::new(no_jitter_config()).unwrap();
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let err = Error::transport("reset");
        let decision = policy.should_retry(&RetryContext {
            attempt: 0,
            last_error: &err,
            last_response: None,
            cancel: &cancel,
        });
        assert!(!decision.retry);
        assert!(decision.reason.contains("cancelled"));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(no_jitter_config()).unwrap();
        let cancel = CancellationHandle::new();
        let err = Error::transport("reset");
        let decision = policy.should_retry(&RetryContext {
            attempt: 3,
            last_error: &err,
            last_response: None,
            cancel: &cancel,
        });
        assert!(!decision.retry);
    }

    #[test]
    fn test_non_retryable_status() {
        let policy = RetryPolicy::new(no_jitter_config()).unwrap();
        let cancel = CancellationHandle::new();
        let response = response_with_status(404);
        let err = Error::provider("not found");
        let decision = policy.should_retry(&RetryContext {
            attempt: 0,
            last_error: &err,
            last_response: Some(&response),
            cancel: &cancel,
        });
        assert!(!decision.retry);
        assert!(decision.reason.contains("404"));
    }

    #[test]
    fn test_non_retryable_error_kind() {
        let policy = RetryPolicy::new(no_jitter_config()).unwrap();
        let cancel = CancellationHandle::new();
        let err = Error::auth("bad key");
        let decision = policy.should_retry(&RetryContext {
            attempt: 0,
            last_error: &err,
            last_response: None,
            cancel: &cancel,
        });
        assert!(!decision.retry);
    }

    #[test]
    fn test_retry_after_seconds_capped() {
        // S4: retry-after 20s with max 30s passes through; with max 10s caps.
        let policy = RetryPolicy::new(no_jitter_config()).unwrap();
        let cancel = CancellationHandle::new();
        let response = response_with_retry_after("20");
        let err = Error::provider("throttled");

        let decision = policy.should_retry(&RetryContext {
            attempt: 0,
            last_error: &err,
            last_response: Some(&response),
            cancel: &cancel,
        });
        assert!(decision.retry);
        assert_eq!(decision.delay_ms, 20_000);
        assert!(decision.reason.contains("retry-after"));

        policy
            .update_config(RetryPolicyConfig {
                max_delay_ms: 10_000,
                jitter: false,
                ..Default::default()
            })
            .unwrap();
        let decision = policy.should_retry(&RetryContext {
            attempt: 0,
            last_error: &err,
            last_response: Some(&response),
            cancel: &cancel,
        });
        assert_eq!(decision.delay_ms, 10_000);
    }

    #[test]
    fn test_retry_after_http_date() {
        // A date comfortably in the future yields a positive delay.
        let future = SystemTime::now() + Duration::from_secs(3600);
        let secs = future
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let formatted = format_http_date(secs);
        let delay = parse_retry_after(&formatted).unwrap();
        assert!(delay > 3_500_000 && delay <= 3_600_000, "delay was {delay}");

        // Past dates yield zero.
        assert_eq!(parse_retry_after("Sun, 06 Nov 1994 08:49:37 GMT"), Some(0));
        // Garbage yields None.
        assert_eq!(parse_retry_after("soon"), None);
    }

    /// Inverse of `parse_http_date`, for round-trip testing only.
    fn format_http_date(epoch_secs: u64) -> String {
        let days = epoch_secs / 86_400;
        let (year, month, day) = civil_from_days(days as i64);
        let secs_of_day = epoch_secs % 86_400;
        let months = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        format!(
            "Thu, {:02} {} {} {:02}:{:02}:{:02} GMT",
            day,
            months[(month - 1) as usize],
            year,
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60
        )
    }

    fn civil_from_days(z: i64) -> (i64, i64, i64) {
        let z = z + 719_468;
        let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let y = yoe + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let d = doy - (153 * mp + 2) / 5 + 1;
        let m = if mp < 10 { mp + 3 } else { mp - 9 };
        (if m <= 2 { y + 1 } else { y }, m, d)
    }

    #[test]
    fn test_exponential_backoff_growth_and_cap() {
        let config = RetryPolicyConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_backoff(&config, 0), 100);
        assert_eq!(compute_backoff(&config, 1), 200);
        assert_eq!(compute_backoff(&config, 2), 400);
        assert_eq!(compute_backoff(&config, 3), 800);
        assert_eq!(compute_backoff(&config, 4), 1000);
        // Huge attempts are clamped, not overflowed.
        assert_eq!(compute_backoff(&config, 1000), 1000);
    }

    #[test]
    fn test_linear_backoff() {
        let config = RetryPolicyConfig {
            backoff: BackoffStrategy::Linear,
            base_delay_ms: 100,
            max_delay_ms: 350,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_backoff(&config, 0), 100);
        assert_eq!(compute_backoff(&config, 1), 200);
        assert_eq!(compute_backoff(&config, 2), 300);
        assert_eq!(compute_backoff(&config, 3), 350);
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let config = RetryPolicyConfig {
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter: true,
            ..Default::default()
        };
        for attempt in 0..20 {
            assert!(compute_backoff(&config, attempt) <= 500);
        }
    }

    #[tokio::test]
    async fn test_delay_aborts_on_cancel() {
        let policy = RetryPolicy::default();
        let cancel = CancellationHandle::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let start = std::time::Instant::now();
        let err = policy.delay(10_000, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Cancelled {
                stage: CancelStage::RetryDelay
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
