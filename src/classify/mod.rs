//! Quota-gated record classification.
//!
//! [`ClassificationClient::classify`] turns one record into a validated
//! label or a typed [`ClassifyFailure`]. It never mutates the record; the
//! orchestrator persists the result.

mod extract;
mod prompt;

pub use extract::extract_label;
pub use prompt::{RESPONSE_TOKEN_ALLOWANCE, build_prompt, estimate_tokens};

use crate::config::{Area, AreaCatalog};
use crate::llm::LlmProvider;
use crate::models::{FailureCategory, Record};
use crate::ratelimit::{
    BackoffConfig, BackoffController, Clock, QuotaConfig, QuotaTracker, Sleeper, SystemClock,
    ThreadSleeper,
};
use crate::Error;
use crate::shutdown::CancellationFlag;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Why a record could not be labeled on this attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyFailure {
    /// The provider signalled rate limiting.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Network, timeout, server or decoding error.
    #[error("transport error: {0}")]
    Transport(String),

    /// No known label could be found in the answer.
    #[error("no label found in response: {response:?}")]
    Unclassifiable {
        /// Raw model answer.
        response: String,
    },

    /// The extracted label is not a candidate of the record's area.
    #[error("label '{label}' is not valid for area '{area}'")]
    InvalidMapping {
        /// Extracted label.
        label: String,
        /// Record area.
        area: String,
    },

    /// The area is not in the catalog.
    #[error("unknown area '{0}'")]
    UnknownArea(String),

    /// The prompt alone exceeds the token ceiling and can never be admitted.
    #[error("estimated {estimated} tokens exceeds the ceiling of {ceiling}")]
    Oversized {
        /// Estimated call cost.
        estimated: u64,
        /// Configured token ceiling.
        ceiling: u64,
    },

    /// Cancellation was requested before the call went out.
    #[error("cancelled")]
    Cancelled,
}

impl ClassifyFailure {
    /// Failure-log category; `None` for cancellation, which is not logged.
    #[must_use]
    pub const fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Throttled(_) => Some(FailureCategory::Throttled),
            Self::Transport(_) => Some(FailureCategory::Transport),
            Self::Unclassifiable { .. } => Some(FailureCategory::Unclassifiable),
            Self::InvalidMapping { .. } | Self::UnknownArea(_) => {
                Some(FailureCategory::InvalidMapping)
            },
            Self::Oversized { .. } => Some(FailureCategory::Oversized),
            Self::Cancelled => None,
        }
    }

    /// Whether a later retry scan picks this failure up.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self.category() {
            Some(category) => category.is_retryable(),
            None => false,
        }
    }
}

/// A successful classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Chosen label.
    pub label: String,
    /// Tokens charged against the quota; zero when no call was made.
    pub tokens: u64,
    /// Whether the remote model was consulted.
    pub remote: bool,
}

/// Composes prompts, gates calls on quota and backoff, and maps answers to
/// labels.
///
/// Quota and backoff state live behind mutexes. The quota guard is held
/// from the admission check until the call is recorded, so streams sharing
/// one client cannot over-admit.
pub struct ClassificationClient<P: LlmProvider> {
    provider: P,
    catalog: AreaCatalog,
    quota: Mutex<QuotaTracker>,
    backoff: Mutex<BackoffController>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationFlag,
}

impl<P: LlmProvider> ClassificationClient<P> {
    /// Creates a client on wall-clock time.
    #[must_use]
    pub fn new(
        provider: P,
        catalog: AreaCatalog,
        quota: QuotaConfig,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            provider,
            catalog,
            quota: Mutex::new(QuotaTracker::new(quota)),
            backoff: Mutex::new(BackoffController::new(backoff)),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper),
            cancel: CancellationFlag::new(),
        }
    }

    /// Replaces the time source and the sleeper.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        self.clock = clock;
        self.sleeper = sleeper;
        self
    }

    /// Uses `flag` for cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Area table in use.
    #[must_use]
    pub const fn catalog(&self) -> &AreaCatalog {
        &self.catalog
    }

    /// The wrapped provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Consecutive failures currently driving the backoff.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_backoff().failures()
    }

    /// Remaining `(requests, tokens)` budget right now.
    #[must_use]
    pub fn remaining_quota(&self) -> (u64, u64) {
        self.lock_quota().remaining(self.clock.now())
    }

    fn lock_quota(&self) -> MutexGuard<'_, QuotaTracker> {
        self.quota
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_backoff(&self) -> MutexGuard<'_, BackoffController> {
        self.backoff
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Classifies `record` within `area`.
    ///
    /// An area with a single candidate is answered without a remote call.
    /// Otherwise the call waits for quota (and any active backoff), goes
    /// out once, and on failure sleeps the backoff delay before returning;
    /// re-dispatching is the caller's decision.
    ///
    /// # Errors
    ///
    /// Every unsuccessful path returns a [`ClassifyFailure`].
    pub fn classify(&self, record: &Record, area: &str) -> Result<Classification, ClassifyFailure> {
        let span = tracing::info_span!(
            "classify.record",
            record = %record.id,
            area = area,
            label = tracing::field::Empty
        );
        let _enter = span.enter();

        let Some(area_def) = self.catalog.get(area) else {
            return Err(ClassifyFailure::UnknownArea(area.to_string()));
        };

        if let Some(label) = area_def.sole_label() {
            tracing::debug!("Area {area} has a single label, skipping remote call");
            span.record("label", label);
            return Ok(Classification {
                label: label.to_string(),
                tokens: 0,
                remote: false,
            });
        }

        let prompt = build_prompt(record, area_def);
        let estimated = estimate_tokens(&prompt);
        let answer = self.call(&prompt, estimated)?;

        let label = self.resolve_label(&answer.text, area_def)?;
        span.record("label", label.as_str());
        Ok(Classification {
            label,
            tokens: answer.tokens,
            remote: true,
        })
    }

    fn resolve_label(&self, response: &str, area: &Area) -> Result<String, ClassifyFailure> {
        let vocabulary = self.catalog.vocabulary_for(&area.name);
        let Some(label) = extract_label(response, &vocabulary) else {
            tracing::warn!(
                "No label in response {:?}; valid labels: {}",
                truncate(response, 100),
                area.labels.join(", ")
            );
            return Err(ClassifyFailure::Unclassifiable {
                response: response.to_string(),
            });
        };
        if !area.contains(label) {
            tracing::warn!("Label {label} is not valid for area {}", area.name);
            return Err(ClassifyFailure::InvalidMapping {
                label: label.to_string(),
                area: area.name.clone(),
            });
        }
        Ok(label.to_string())
    }

    /// Waits for admission, performs one remote call and updates quota and
    /// backoff state.
    fn call(&self, prompt: &str, estimated: u64) -> Result<Answer, ClassifyFailure> {
        let provider = self.provider.name();
        let mut quota = self.lock_quota();

        if quota.exceeds_ceiling(estimated) {
            return Err(ClassifyFailure::Oversized {
                estimated,
                ceiling: quota.config().max_tokens,
            });
        }

        loop {
            let now = self.clock.now();
            let Some(window) = quota.blocking_window(estimated, now) else {
                break;
            };
            let mut wait = quota.time_until_available(estimated, now);
            let backoff = self.lock_backoff();
            if backoff.failures() > 0 {
                wait = wait.max(backoff.next_delay());
            }
            drop(backoff);
            if self.cancel.is_cancelled() {
                return Err(ClassifyFailure::Cancelled);
            }
            tracing::info!(
                "Waiting {:.1}s for the {window} window to free up",
                wait.as_secs_f64()
            );
            metrics::histogram!("quota_wait_seconds", "window" => window.to_string())
                .record(wait.as_secs_f64());
            self.sleeper.sleep(wait);
        }

        if self.cancel.is_cancelled() {
            return Err(ClassifyFailure::Cancelled);
        }

        let started = self.clock.now();
        let result = self.provider.complete(prompt);
        let elapsed = self.clock.now().saturating_duration_since(started);

        match result {
            Ok(completion) => {
                let tokens = completion.total_tokens.unwrap_or(estimated);
                let now = self.clock.now();
                quota.record(tokens, now);
                let (requests_left, tokens_left) = quota.remaining(now);
                drop(quota);

                let mut backoff = self.lock_backoff();
                if backoff.failures() > 0 {
                    tracing::info!(
                        "Call succeeded, resetting backoff after {} failures",
                        backoff.failures()
                    );
                }
                backoff.on_success();
                drop(backoff);

                record_request_metrics(provider, "success", elapsed);
                metrics::gauge!("backoff_failures").set(0.0);
                tracing::debug!(
                    "Quota remaining: {requests_left} requests, {tokens_left} tokens"
                );
                Ok(Answer {
                    text: completion.text,
                    tokens,
                })
            },
            Err(err) => {
                drop(quota);
                let (status, failure) = match err {
                    Error::RateLimited { cause, .. } => ("throttled", ClassifyFailure::Throttled(cause)),
                    other => ("error", ClassifyFailure::Transport(other.to_string())),
                };
                record_request_metrics(provider, status, elapsed);

                let delay = self.register_failure();
                tracing::warn!(
                    "{failure}; backing off {:.1}s (consecutive failures: {})",
                    delay.as_secs_f64(),
                    self.consecutive_failures()
                );
                if !self.cancel.is_cancelled() {
                    self.sleeper.sleep(delay);
                }
                Err(failure)
            },
        }
    }

    /// Counts a failure and returns the delay to sleep before returning.
    ///
    /// The delay is taken before the counter moves, so consecutive failures
    /// sleep `base`, `base * m`, `base * m^2` and so on.
    fn register_failure(&self) -> Duration {
        let mut backoff = self.lock_backoff();
        let delay = backoff.next_delay();
        backoff.on_failure();
        metrics::gauge!("backoff_failures").set(f64::from(backoff.failures()));
        delay
    }
}

struct Answer {
    text: String,
    tokens: u64,
}

fn record_request_metrics(provider: &'static str, status: &'static str, elapsed: Duration) {
    metrics::counter!(
        "llm_requests_total",
        "provider" => provider,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "llm_request_duration_ms",
        "provider" => provider,
        "status" => status
    )
    .record(elapsed.as_secs_f64() * 1000.0);
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(i, _)| &s[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::models::RecordId;
    use crate::ratelimit::ManualClock;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        replies: Mutex<VecDeque<crate::Result<Completion>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<crate::Result<Completion>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> crate::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Completion::text("")))
        }
    }

    fn throttled() -> crate::Result<Completion> {
        Err(Error::RateLimited {
            provider: "scripted",
            cause: "429".to_string(),
        })
    }

    fn client(replies: Vec<crate::Result<Completion>>) -> (ClassificationClient<Scripted>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let client = ClassificationClient::new(
            Scripted::new(replies),
            AreaCatalog::enem(),
            QuotaConfig::default(),
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock.clone());
        (client, clock)
    }

    fn record() -> Record {
        let mut fields = serde_json::Map::new();
        fields.insert("context".into(), "Texto da questão".into());
        Record::new(RecordId::new("year/2020/questions/5/details.json"), "p", fields)
    }

    #[test]
    fn test_single_label_area_makes_no_call() {
        let (client, clock) = client(vec![]);
        let result = client.classify(&record(), "matematica").unwrap();
        assert_eq!(result.label, "matematica");
        assert!(!result.remote);
        assert_eq!(client.provider().calls(), 0);
        assert_eq!(client.remaining_quota(), (30, 6_000));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_success_records_actual_tokens() {
        let (client, _) = client(vec![Ok(Completion::text("Geografia").with_total_tokens(420))]);
        let result = client.classify(&record(), "ciencias-humanas").unwrap();
        assert_eq!(result.label, "geografia");
        assert_eq!(result.tokens, 420);
        assert_eq!(client.remaining_quota(), (29, 5_580));
    }

    #[test]
    fn test_missing_usage_falls_back_to_estimate() {
        let (client, _) = client(vec![Ok(Completion::text("fisica"))]);
        let result = client.classify(&record(), "ciencias-natureza").unwrap();
        let area = client.catalog().get("ciencias-natureza").unwrap();
        assert_eq!(result.tokens, estimate_tokens(&build_prompt(&record(), area)));
    }

    #[test]
    fn test_throttled_sleeps_backoff_curve_and_resets() {
        let (client, clock) = client(vec![throttled(), throttled(), throttled(), Ok(Completion::text("quimica"))]);
        for _ in 0..3 {
            let err = client.classify(&record(), "ciencias-natureza").unwrap_err();
            assert!(matches!(err, ClassifyFailure::Throttled(_)));
            assert!(err.is_retryable());
        }
        let sleeps: Vec<f64> = clock.sleeps().iter().map(Duration::as_secs_f64).collect();
        assert_eq!(sleeps, vec![3.0, 4.5, 6.75]);
        assert_eq!(client.consecutive_failures(), 3);

        assert_eq!(client.classify(&record(), "ciencias-natureza").unwrap().label, "quimica");
        assert_eq!(client.consecutive_failures(), 0);
    }

    #[test]
    fn test_transport_error_is_retryable() {
        let (client, _) = client(vec![Err(Error::Transport {
            provider: "scripted",
            cause: "connection reset".to_string(),
        })]);
        let err = client.classify(&record(), "linguagens").unwrap_err();
        assert!(matches!(err, ClassifyFailure::Transport(ref m) if m.contains("connection reset")));
        assert_eq!(err.category(), Some(FailureCategory::Transport));
        assert_eq!(client.remaining_quota(), (30, 6_000));
    }

    #[test]
    fn test_unclassifiable_and_invalid_mapping() {
        let (client, _) = client(vec![
            Ok(Completion::text("Não tenho certeza")),
            Ok(Completion::text("história")),
        ]);
        let err = client.classify(&record(), "ciencias-natureza").unwrap_err();
        assert!(matches!(err, ClassifyFailure::Unclassifiable { .. }));
        assert!(!err.is_retryable());

        let err = client.classify(&record(), "ciencias-natureza").unwrap_err();
        assert_eq!(
            err,
            ClassifyFailure::InvalidMapping {
                label: "historia".to_string(),
                area: "ciencias-natureza".to_string(),
            }
        );
        assert_eq!(err.category(), Some(FailureCategory::InvalidMapping));
    }

    #[test]
    fn test_own_area_answer_wins_over_foreign_mention() {
        let (client, _) = client(vec![Ok(Completion::text("Química, não historia"))]);
        let result = client.classify(&record(), "ciencias-natureza").unwrap();
        assert_eq!(result.label, "quimica");
    }

    #[test]
    fn test_unknown_area() {
        let (client, _) = client(vec![]);
        let err = client.classify(&record(), "astronomia").unwrap_err();
        assert_eq!(err.category(), Some(FailureCategory::InvalidMapping));
        assert_eq!(client.provider().calls(), 0);
    }

    #[test]
    fn test_waits_for_request_window() {
        let clock = Arc::new(ManualClock::new());
        let client = ClassificationClient::new(
            Scripted::new(vec![]),
            AreaCatalog::enem(),
            QuotaConfig {
                max_requests: 2,
                ..QuotaConfig::default()
            },
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock.clone());

        let start = clock.now();
        for _ in 0..3 {
            // Empty answers are unclassifiable but still consume quota.
            let _ = client.classify(&record(), "ciencias-humanas");
        }
        assert_eq!(client.provider().calls(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(70)]);
        assert!(clock.now() - start >= Duration::from_secs(70));
    }

    #[test]
    fn test_oversized_prompt_fails_fast() {
        let clock = Arc::new(ManualClock::new());
        let client = ClassificationClient::new(
            Scripted::new(vec![]),
            AreaCatalog::enem(),
            QuotaConfig {
                max_tokens: 50,
                ..QuotaConfig::default()
            },
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock.clone());

        let err = client.classify(&record(), "ciencias-humanas").unwrap_err();
        assert!(matches!(err, ClassifyFailure::Oversized { ceiling: 50, .. }));
        assert!(!err.is_retryable());
        assert_eq!(client.provider().calls(), 0);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_cancelled_before_call() {
        let flag = CancellationFlag::new();
        let (client, _) = client(vec![Ok(Completion::text("fisica"))]);
        let client = client.with_cancellation(flag.clone());
        flag.cancel();
        let err = client.classify(&record(), "ciencias-natureza").unwrap_err();
        assert_eq!(err, ClassifyFailure::Cancelled);
        assert_eq!(err.category(), None);
        assert_eq!(client.provider().calls(), 0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("história", 3), "his");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
