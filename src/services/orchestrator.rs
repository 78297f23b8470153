//! Batch orchestration.

use crate::classify::{ClassificationClient, ClassifyFailure};
use crate::config::ClassifierConfig;
use crate::corpus::BatchItem;
use crate::llm::LlmProvider;
use crate::models::{BatchCounters, FailureCategory, FailureEntry, RecordId};
use crate::shutdown::CancellationFlag;
use crate::storage::{CheckpointStore, FailureLog, RecordStore};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Outcome of a batch or retry run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Batch identifier (`retry` for retry runs).
    pub batch_id: String,
    /// Records labeled by this run.
    pub processed: usize,
    /// Records that failed and were logged.
    pub failed: usize,
    /// Records already settled or checkpointed.
    pub skipped: usize,
    /// Tokens charged by this run's remote calls.
    pub tokens: u64,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
}

impl BatchReport {
    fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            ..Self::default()
        }
    }

    /// Counters in checkpoint form.
    #[must_use]
    pub const fn counters(&self) -> BatchCounters {
        BatchCounters {
            processed: self.processed,
            failed: self.failed,
            skipped: self.skipped,
        }
    }

    /// Merges another report's counts into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.tokens += other.tokens;
        self.cancelled |= other.cancelled;
    }
}

/// What happened to one record.
#[derive(Debug)]
enum Outcome {
    Settled,
    Labeled { tokens: u64 },
    Failed { category: FailureCategory, message: String, area: Option<String> },
    Cancelled,
}

impl Outcome {
    const fn metric_label(&self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::Labeled { .. } => "labeled",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Where a record's area comes from.
#[derive(Debug, Clone, Copy)]
enum AreaSource<'a> {
    /// Declared by the batch index.
    Declared(&'a str),
    /// Retry: the record's own area, else the one logged with the failure.
    Logged(Option<&'a str>),
}

impl<'a> AreaSource<'a> {
    const fn hint(self) -> Option<&'a str> {
        match self {
            Self::Declared(area) => Some(area),
            Self::Logged(area) => area,
        }
    }
}

/// Walks batches one record at a time.
///
/// Per-record failures are written to the failure log and never abort the
/// batch. Errors returned from [`BatchOrchestrator::run_batch`] and
/// [`BatchOrchestrator::retry`] mean the bookkeeping itself (checkpoint or
/// failure log) could not be written.
pub struct BatchOrchestrator<P: LlmProvider> {
    client: ClassificationClient<P>,
    records: RecordStore,
    checkpoints: CheckpointStore,
    failures: FailureLog,
    cadence: usize,
    cancel: CancellationFlag,
}

impl<P: LlmProvider> BatchOrchestrator<P> {
    /// Default number of successes between checkpoint writes.
    pub const DEFAULT_CADENCE: usize = 10;

    /// Creates an orchestrator over explicit collaborators.
    #[must_use]
    pub fn new(
        client: ClassificationClient<P>,
        records: RecordStore,
        checkpoints: CheckpointStore,
        failures: FailureLog,
    ) -> Self {
        Self {
            client,
            records,
            checkpoints,
            failures,
            cadence: Self::DEFAULT_CADENCE,
            cancel: CancellationFlag::new(),
        }
    }

    /// Wires everything from a validated configuration.
    #[must_use]
    pub fn from_config(config: &ClassifierConfig, provider: P, cancel: CancellationFlag) -> Self {
        let client = ClassificationClient::new(
            provider,
            config.areas.clone(),
            config.quota,
            config.backoff,
        )
        .with_cancellation(cancel.clone());
        Self::new(
            client,
            RecordStore::new(&config.base_path, config.areas.clone()),
            CheckpointStore::new(config.checkpoint_dir()),
            FailureLog::new(config.failure_log_path()),
        )
        .with_cadence(config.checkpoint.cadence)
        .with_cancellation(cancel)
    }

    /// Sets the checkpoint cadence (clamped to at least one).
    #[must_use]
    pub fn with_cadence(mut self, cadence: usize) -> Self {
        self.cadence = cadence.max(1);
        self
    }

    /// Uses `flag` to stop between records.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// The classification client.
    #[must_use]
    pub const fn client(&self) -> &ClassificationClient<P> {
        &self.client
    }

    /// The failure log.
    #[must_use]
    pub const fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    /// The checkpoint store.
    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Processes `items` in order, resuming from the batch checkpoint.
    ///
    /// Records listed in the checkpoint are skipped without being read.
    /// The checkpoint is rewritten every `cadence` successes and always
    /// before returning, including after cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint or the failure log cannot be
    /// read or written.
    pub fn run_batch(&self, batch_id: &str, items: &[BatchItem]) -> Result<BatchReport> {
        let span = tracing::info_span!("batch.run", batch = batch_id, records = items.len());
        let _enter = span.enter();

        let (mut completed, earlier) = self
            .checkpoints
            .load_checkpoint(batch_id)?
            .map(|c| (c.completed, c.counters))
            .unwrap_or_default();
        let mut done: HashSet<RecordId> = completed.iter().cloned().collect();
        let mut logged = self.failures.logged_ids()?;
        if !done.is_empty() {
            tracing::info!("Resuming batch {batch_id}: {} records already done", done.len());
        }

        let mut report = BatchReport::new(batch_id);
        let mut since_save = 0usize;

        for (position, item) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if done.contains(&item.id) {
                tracing::debug!("{} already in checkpoint", item.id);
                report.skipped += 1;
                metrics::counter!("classify_records_total", "outcome" => "checkpointed")
                    .increment(1);
                continue;
            }

            tracing::info!("[{}/{}] {}", position + 1, items.len(), item.id);
            let outcome = self.process(&item.id, &item.path, AreaSource::Declared(&item.area));
            metrics::counter!("classify_records_total", "outcome" => outcome.metric_label())
                .increment(1);

            match outcome {
                Outcome::Settled => {
                    report.skipped += 1;
                    self.forget_failures(&item.id, &mut logged)?;
                    if done.insert(item.id.clone()) {
                        completed.push(item.id.clone());
                    }
                },
                Outcome::Labeled { tokens } => {
                    report.processed += 1;
                    report.tokens += tokens;
                    self.forget_failures(&item.id, &mut logged)?;
                    if done.insert(item.id.clone()) {
                        completed.push(item.id.clone());
                    }
                    since_save += 1;
                    if since_save >= self.cadence {
                        self.checkpoints.save(
                            batch_id,
                            &completed,
                            earlier.resumed_with(report.counters()),
                        )?;
                        since_save = 0;
                    }
                },
                Outcome::Failed {
                    category,
                    message,
                    area,
                } => {
                    report.failed += 1;
                    self.log_failure(&item.id, &item.path, category, &message, area.as_deref())?;
                    logged.insert(item.id.clone());
                },
                Outcome::Cancelled => {
                    report.cancelled = true;
                    break;
                },
            }
        }

        self.checkpoints
            .save(batch_id, &completed, earlier.resumed_with(report.counters()))?;
        tracing::info!(
            "Batch {batch_id} finished: {} processed, {} skipped, {} failed{}",
            report.processed,
            report.skipped,
            report.failed,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Re-dispatches logged failures, ignoring checkpoints.
    ///
    /// The area comes from the record itself (so an operator correction
    /// takes effect), falling back to the one logged with the failure. A
    /// success or an already-settled record removes the record from the
    /// log; a repeated failure replaces its previous entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure log cannot be read or written.
    pub fn retry(&self, candidates: &[FailureEntry]) -> Result<BatchReport> {
        let span = tracing::info_span!("batch.run", batch = "retry", records = candidates.len());
        let _enter = span.enter();

        let mut report = BatchReport::new("retry");
        for (position, entry) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            tracing::info!(
                "[{}/{}] Retrying {} (last failure: {})",
                position + 1,
                candidates.len(),
                entry.record_id,
                entry.category
            );
            let path = entry.record_id.to_path(self.records.base_path());
            let outcome =
                self.process(&entry.record_id, &path, AreaSource::Logged(entry.area.as_deref()));
            metrics::counter!("classify_records_total", "outcome" => outcome.metric_label())
                .increment(1);

            match outcome {
                Outcome::Settled => {
                    report.skipped += 1;
                    self.failures.compact_remove(&entry.record_id)?;
                },
                Outcome::Labeled { tokens } => {
                    report.processed += 1;
                    report.tokens += tokens;
                    self.failures.compact_remove(&entry.record_id)?;
                },
                Outcome::Failed {
                    category,
                    message,
                    area,
                } => {
                    report.failed += 1;
                    self.log_failure(
                        &entry.record_id,
                        &path,
                        category,
                        &message,
                        area.as_deref(),
                    )?;
                    self.failures.compact_superseded(&entry.record_id)?;
                },
                Outcome::Cancelled => {
                    report.cancelled = true;
                    break;
                },
            }
        }

        let summary = self.failures.summary()?;
        if summary.is_empty() {
            tracing::info!("Failure log is empty");
        } else {
            for (category, entries) in &summary.by_category {
                tracing::info!("Still failing: {category} = {}", entries.len());
            }
        }
        Ok(report)
    }

    /// Loads, checks and classifies one record, persisting a new label.
    fn process(&self, id: &RecordId, path: &Path, source: AreaSource<'_>) -> Outcome {
        let record = match self.records.load(path) {
            Ok(record) => record,
            Err(Error::NotFound(_)) => {
                tracing::warn!("Record file not found: {}", path.display());
                return Outcome::Failed {
                    category: FailureCategory::NotFound,
                    message: "record file not found".to_string(),
                    area: source.hint().map(ToString::to_string),
                };
            },
            Err(e) => {
                tracing::warn!("Cannot load {id}: {e}");
                return Outcome::Failed {
                    category: FailureCategory::Storage,
                    message: e.to_string(),
                    area: source.hint().map(ToString::to_string),
                };
            },
        };

        if self.records.is_settled(&record) {
            tracing::debug!(
                "{id} already settled as {}/{}",
                record.area().unwrap_or_default(),
                record.label().unwrap_or_default()
            );
            return Outcome::Settled;
        }

        let area = match source {
            AreaSource::Declared(area) => area.to_string(),
            AreaSource::Logged(logged) => match record
                .area_hint()
                .filter(|area| self.client.catalog().is_area(area))
                .or(logged)
            {
                Some(area) => area.to_string(),
                None => {
                    return Outcome::Failed {
                        category: FailureCategory::InvalidMapping,
                        message: "record has no area".to_string(),
                        area: None,
                    };
                },
            },
        };

        match self.client.classify(&record, &area) {
            Ok(classification) => match self.records.save(&record, &area, &classification.label) {
                Ok(_) => {
                    tracing::info!("{id}: {area} -> {}", classification.label);
                    Outcome::Labeled {
                        tokens: classification.tokens,
                    }
                },
                Err(e) => Outcome::Failed {
                    category: FailureCategory::Storage,
                    message: e.to_string(),
                    area: Some(area),
                },
            },
            Err(ClassifyFailure::Cancelled) => Outcome::Cancelled,
            Err(failure) => {
                tracing::warn!("{id}: {failure}");
                Outcome::Failed {
                    category: failure.category().unwrap_or(FailureCategory::Transport),
                    message: failure.to_string(),
                    area: Some(area),
                }
            },
        }
    }

    fn forget_failures(&self, id: &RecordId, logged: &mut HashSet<RecordId>) -> Result<()> {
        if logged.remove(id) {
            self.failures.compact_remove(id)?;
        }
        Ok(())
    }

    fn log_failure(
        &self,
        id: &RecordId,
        path: &Path,
        category: FailureCategory,
        message: &str,
        area: Option<&str>,
    ) -> Result<()> {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.failures
            .append(&FailureEntry::now(id.clone(), absolute, category, message, area))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AreaCatalog;
    use crate::llm::Completion;
    use crate::ratelimit::{BackoffConfig, ManualClock, QuotaConfig};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Scripted {
        replies: Mutex<VecDeque<crate::Result<Completion>>>,
        calls: AtomicUsize,
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
                .unwrap_or_else(|| Ok(Completion::text("historia")))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        orchestrator: BatchOrchestrator<Scripted>,
    }

    fn fixture(replies: Vec<crate::Result<Completion>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let catalog = AreaCatalog::enem();
        let client = ClassificationClient::new(
            Scripted {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            },
            catalog.clone(),
            QuotaConfig::default(),
            BackoffConfig::default(),
        )
        .with_clock(clock.clone(), clock);
        let orchestrator = BatchOrchestrator::new(
            client,
            RecordStore::new(dir.path(), catalog),
            CheckpointStore::new(dir.path()),
            FailureLog::new(dir.path().join("filter_errors.jsonl")),
        );
        Fixture { dir, orchestrator }
    }

    impl Fixture {
        fn item(&self, number: u64, area: &str, body: Option<&serde_json::Value>) -> BatchItem {
            let relative = format!("year/2020/questions/{number}/details.json");
            let path = self.dir.path().join(&relative);
            if let Some(body) = body {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, body.to_string()).unwrap();
            }
            BatchItem {
                id: RecordId::new(relative),
                path,
                area: area.to_string(),
                index: number,
            }
        }

        fn calls(&self) -> usize {
            self.orchestrator.client().provider().calls.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_run_batch_labels_and_checkpoints() {
        let fx = fixture(vec![Ok(Completion::text("Geografia"))]);
        let items = vec![
            fx.item(1, "ciencias-humanas", Some(&json!({"context": "mapa"}))),
            fx.item(2, "matematica", Some(&json!({"context": "conta"}))),
        ];

        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(fx.calls(), 1);

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&items[0].path).unwrap()).unwrap();
        assert_eq!(saved["area"], "ciencias-humanas");
        assert_eq!(saved["discipline"], "geografia");

        let checkpoint = fx.orchestrator.checkpoints().load("2020").unwrap();
        assert_eq!(checkpoint.len(), 2);
    }

    #[test]
    fn test_checkpointed_records_are_not_resubmitted() {
        let fx = fixture(vec![]);
        let items = vec![fx.item(1, "ciencias-humanas", Some(&json!({"context": "a"})))];
        fx.orchestrator
            .checkpoints()
            .save("2020", &[items[0].id.clone()], BatchCounters::default())
            .unwrap();

        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.calls(), 0);
    }

    #[test]
    fn test_settled_record_is_skipped_without_call() {
        let fx = fixture(vec![]);
        let items = vec![fx.item(
            1,
            "ciencias-humanas",
            Some(&json!({"area": "ciencias-humanas", "discipline": "filosofia"})),
        )];

        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.calls(), 0);
        assert!(fx.orchestrator.checkpoints().load("2020").unwrap().contains(&items[0].id));
    }

    #[test]
    fn test_failures_are_logged_and_batch_continues() {
        let fx = fixture(vec![Ok(Completion::text("não sei"))]);
        let items = vec![
            fx.item(1, "ciencias-humanas", None),
            fx.item(2, "ciencias-humanas", Some(&json!({"context": "x"}))),
            fx.item(3, "ciencias-humanas", Some(&json!({"context": "y"}))),
        ];

        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.processed, 1);

        let summary = fx.orchestrator.failure_log().summary().unwrap();
        assert_eq!(summary.count(FailureCategory::NotFound), 1);
        assert_eq!(summary.count(FailureCategory::Unclassifiable), 1);

        let completed = fx.orchestrator.checkpoints().load("2020").unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed.contains(&items[2].id));
    }

    #[test]
    fn test_retry_success_compacts_log() {
        let fx = fixture(vec![
            Err(Error::Transport {
                provider: "scripted",
                cause: "503".to_string(),
            }),
            Ok(Completion::text("sociologia")),
        ]);
        let items = vec![fx.item(1, "ciencias-humanas", Some(&json!({"context": "x"})))];

        fx.orchestrator.run_batch("2020", &items).unwrap();
        let log = fx.orchestrator.failure_log();
        let candidates = log.scan(false).unwrap();
        assert_eq!(candidates.len(), 1);

        let report = fx.orchestrator.retry(&candidates).unwrap();
        assert_eq!(report.processed, 1);
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_retry_failure_replaces_entry() {
        let fx = fixture(vec![
            Ok(Completion::text("???")),
            Ok(Completion::text("ainda nada")),
        ]);
        let items = vec![fx.item(1, "ciencias-humanas", Some(&json!({"context": "x"})))];

        fx.orchestrator.run_batch("2020", &items).unwrap();
        let log = fx.orchestrator.failure_log();
        let report = fx.orchestrator.retry(&log.scan(true).unwrap()).unwrap();

        assert_eq!(report.failed, 1);
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("ainda nada"));
    }

    #[test]
    fn test_resumed_checkpoint_accumulates_counters() {
        let fx = fixture(vec![
            Ok(Completion::text("Geografia")),
            Err(Error::Transport {
                provider: "scripted",
                cause: "reset".to_string(),
            }),
            Ok(Completion::text("historia")),
        ]);
        let items = vec![
            fx.item(1, "ciencias-humanas", Some(&json!({"context": "a"}))),
            fx.item(2, "ciencias-humanas", Some(&json!({"context": "b"}))),
        ];

        fx.orchestrator.run_batch("2020", &items).unwrap();
        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert_eq!((report.processed, report.skipped), (1, 1));

        let checkpoint = fx
            .orchestrator
            .checkpoints()
            .load_checkpoint("2020")
            .unwrap()
            .unwrap();
        assert_eq!(
            checkpoint.counters,
            BatchCounters {
                processed: 2,
                failed: 1,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_cancelled_run_still_checkpoints() {
        let fx = fixture(vec![]);
        let flag = CancellationFlag::new();
        flag.cancel();
        let fx = Fixture {
            orchestrator: fx.orchestrator.with_cancellation(flag),
            dir: fx.dir,
        };
        let items = vec![fx.item(1, "ciencias-humanas", Some(&json!({"context": "x"})))];

        let report = fx.orchestrator.run_batch("2020", &items).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.counters().total(), 0);
        assert!(fx.orchestrator.checkpoints().path_for("2020").exists());
    }

    #[test]
    fn test_cadence_is_at_least_one() {
        let fx = fixture(vec![]);
        assert_eq!(fx.orchestrator.with_cadence(0).cadence, 1);
    }
}
