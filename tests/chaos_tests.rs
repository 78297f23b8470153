//! Concurrent classification against one shared client.
//!
//! Several threads classify through the same `ClassificationClient`; the
//! provider stamps every call with the manual clock so the test can check
//! that no request window ever saw more calls than the ceiling allows.

// Chaos tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::needless_collect)]

use exam_classify::llm::Completion;
use exam_classify::models::{Record, RecordId};
use exam_classify::ratelimit::{BackoffConfig, Clock, ManualClock, QuotaConfig};
use exam_classify::{AreaCatalog, ClassificationClient, LlmProvider};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct StampingProvider {
    clock: Arc<ManualClock>,
    calls: Mutex<Vec<Instant>>,
    reported_tokens: Option<u64>,
}

impl LlmProvider for StampingProvider {
    fn name(&self) -> &'static str {
        "stamping"
    }

    fn complete(&self, _prompt: &str) -> exam_classify::Result<Completion> {
        self.calls.lock().unwrap().push(self.clock.now());
        let completion = Completion::text("Geografia");
        Ok(match self.reported_tokens {
            Some(tokens) => completion.with_total_tokens(tokens),
            None => completion,
        })
    }
}

fn record(n: usize) -> Record {
    let mut fields = serde_json::Map::new();
    fields.insert("context".into(), format!("Questão {n}").into());
    Record::new(
        RecordId::new(format!("year/2019/questions/{n}/details.json")),
        format!("/corpus/{n}"),
        fields,
    )
}

#[test]
fn test_concurrent_streams_respect_request_ceiling() {
    let clock = Arc::new(ManualClock::new());
    let quota = QuotaConfig {
        max_requests: 5,
        request_window: Duration::from_secs(70),
        max_tokens: 100_000,
        token_window: Duration::from_secs(60),
    };
    let client = Arc::new(
        ClassificationClient::new(
            StampingProvider {
                clock: clock.clone(),
                calls: Mutex::new(Vec::new()),
                reported_tokens: Some(100),
            },
            AreaCatalog::enem(),
            quota,
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock.clone()),
    );

    let handles: Vec<_> = (0..4)
        .map(|stream| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for i in 0..5 {
                    let result = client.classify(&record(stream * 10 + i), "ciencias-humanas");
                    assert_eq!(result.unwrap().label, "geografia");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let calls = client.provider().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 20);
    for (i, start) in calls.iter().enumerate() {
        let in_window = calls[i..]
            .iter()
            .filter(|at| at.saturating_duration_since(*start) < quota.request_window)
            .count();
        assert!(in_window <= 5, "{in_window} calls within 70s of call {i}");
    }
    // 20 calls at 5 per 70s need at least three full waits.
    assert!(clock.elapsed() >= Duration::from_secs(210));
}

#[test]
fn test_concurrent_token_budget() {
    let clock = Arc::new(ManualClock::new());
    let quota = QuotaConfig {
        max_requests: 1_000,
        request_window: Duration::from_secs(70),
        max_tokens: 500,
        token_window: Duration::from_secs(60),
    };
    let client = Arc::new(
        ClassificationClient::new(
            StampingProvider {
                clock: clock.clone(),
                calls: Mutex::new(Vec::new()),
                reported_tokens: None,
            },
            AreaCatalog::enem(),
            quota,
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock.clone()),
    );

    thread::scope(|scope| {
        for stream in 0..3 {
            let client = &client;
            scope.spawn(move || {
                for i in 0..2 {
                    client.classify(&record(stream * 10 + i), "ciencias-humanas").unwrap();
                }
            });
        }
    });

    // Each prompt is estimated at a bit over 200 tokens, so only two fit in
    // any 60s token window.
    let calls = client.provider().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 6);
    for (i, start) in calls.iter().enumerate() {
        let in_window = calls[i..]
            .iter()
            .filter(|at| at.saturating_duration_since(*start) < quota.token_window)
            .count();
        assert!(in_window <= 2, "{in_window} calls within 60s of call {i}");
    }
    assert!(clock.elapsed() >= Duration::from_secs(120));
}
