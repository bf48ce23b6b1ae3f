//! Raw source records to normalized tables.
//!
//! One [`Processor`] per data type. A processor only decides what happened to
//! a record; [`EtlRunner`] owns the status transition, so every record moves
//! out of `Unprocessed` at most once and along exactly one edge.

pub mod envelope;
pub mod filter;
pub mod rank;
pub mod summary;
pub mod trend;
pub mod units;

use crate::codec::CodecError;
use crate::store::records::{IngestionStore, RecordStatus, SourceRecord};
use crate::store::Database;
use anyhow::Result;
use filter::FilterThresholds;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Terminal outcome of a successfully evaluated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Processed { note: Option<String> },
    Filtered { reason: String },
}

impl Disposition {
    pub fn processed() -> Self {
        Self::Processed { note: None }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Raw content or decoded data does not have the expected shape.
    #[error("payload: {0}")]
    Payload(String),

    #[error("codec[{stage}]: {0}", stage = .0.stage())]
    Codec(#[from] CodecError),

    /// The provider answered with `Status: false`.
    #[error("provider error {code}: {msg}")]
    Envelope { code: i64, msg: String },

    /// A row this record depends on has not been ingested yet.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// Transient storage failure; the record is retried on a later pass.
    #[error("store: {0:#}")]
    Store(anyhow::Error),
}

impl ProcessError {
    pub fn payload(what: &str, err: serde_json::Error) -> Self {
        Self::Payload(format!("{what}: {err}"))
    }
}

impl From<anyhow::Error> for ProcessError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// Turns one raw record into normalized rows.
pub trait Processor: Send + Sync {
    /// Record types this processor consumes.
    fn data_types(&self) -> &[&'static str];

    fn process(&self, record: &SourceRecord) -> Result<Disposition, ProcessError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlOptions {
    /// Store failures tolerated per record before it is closed as an error.
    pub max_retries: u32,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Per-type batch outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub errored: usize,
    pub filtered: usize,
    /// Left unprocessed after a transient failure.
    pub retried: usize,
    /// Already terminal when the transition was attempted.
    pub skipped: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed + self.errored + self.filtered + self.retried + self.skipped
    }
}

pub struct EtlRunner {
    records: IngestionStore,
    processors: Vec<Box<dyn Processor>>,
    options: EtlOptions,
}

impl EtlRunner {
    /// Runner with the rank, summary and trend processors registered.
    pub fn new(db: Arc<Database>, thresholds: FilterThresholds, options: EtlOptions) -> Self {
        let processors: Vec<Box<dyn Processor>> = vec![
            Box::new(rank::RankProcessor::new(Arc::clone(&db))),
            Box::new(summary::SummaryProcessor::new(Arc::clone(&db), thresholds)),
            Box::new(trend::TrendProcessor::new(Arc::clone(&db), thresholds)),
        ];
        Self::with_processors(IngestionStore::new(db), processors, options)
    }

    pub fn with_processors(
        records: IngestionStore,
        processors: Vec<Box<dyn Processor>>,
        options: EtlOptions,
    ) -> Self {
        Self {
            records,
            processors,
            options,
        }
    }

    /// Every type some processor handles, in registration order.
    pub fn data_types(&self) -> Vec<&'static str> {
        self.processors
            .iter()
            .flat_map(|p| p.data_types().iter().copied())
            .collect()
    }

    fn processor_for(&self, data_type: &str) -> Option<&dyn Processor> {
        self.processors
            .iter()
            .find(|p| p.data_types().contains(&data_type))
            .map(|p| p.as_ref())
    }

    /// Process every unprocessed record of `data_type`. Only a failure to
    /// list the records aborts the batch.
    pub fn run_for_type(&self, data_type: &str) -> Result<BatchSummary> {
        let processor = self
            .processor_for(data_type)
            .ok_or_else(|| anyhow::anyhow!("no processor registered for {data_type}"))?;
        let pending = self.records.find_unprocessed(data_type)?;
        let mut summary = BatchSummary::default();

        for record in &pending {
            if let Err(e) = self.apply(processor, record, &mut summary) {
                warn!("record {} ({data_type}): status update failed: {e:#}", record.id);
            }
        }

        info!(
            "etl {data_type}: {} processed, {} filtered, {} errored, {} retried, {} skipped",
            summary.processed, summary.filtered, summary.errored, summary.retried, summary.skipped
        );
        Ok(summary)
    }

    /// [`run_for_type`](Self::run_for_type) for every registered type.
    pub fn run_all(&self) -> Result<Vec<(&'static str, BatchSummary)>> {
        self.data_types()
            .into_iter()
            .map(|t| self.run_for_type(t).map(|s| (t, s)))
            .collect()
    }

    fn apply(
        &self,
        processor: &dyn Processor,
        record: &SourceRecord,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let id = record.id;
        let (status, log) = match processor.process(record) {
            Ok(Disposition::Processed { note }) => {
                (RecordStatus::Processed, note.unwrap_or_else(|| "processed".to_string()))
            }
            Ok(Disposition::Filtered { reason }) => {
                info!("record {id} filtered: {reason}");
                (RecordStatus::Filtered, reason)
            }
            Err(ProcessError::Store(e)) => {
                let message = format!("store: {e:#}");
                let retries = self.records.bump_retries(id, &message)?;
                if retries < self.options.max_retries {
                    warn!("record {id}: {message} (attempt {retries})");
                    summary.retried += 1;
                    return Ok(());
                }
                (
                    RecordStatus::Error,
                    format!("giving up after {retries} attempts: {message}"),
                )
            }
            Err(e) => {
                warn!("record {id}: {e}");
                (RecordStatus::Error, e.to_string())
            }
        };

        if !self.records.update_status_and_log(id, status, &log)? {
            summary.skipped += 1;
            return Ok(());
        }
        match status {
            RecordStatus::Processed => summary.processed += 1,
            RecordStatus::Filtered => summary.filtered += 1,
            _ => summary.errored += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{NewRecord, RequestSnapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Outcome chosen by the raw content.
    struct Scripted {
        store_failures: AtomicUsize,
    }

    impl Processor for Scripted {
        fn data_types(&self) -> &[&'static str] {
            &["scripted"]
        }

        fn process(&self, record: &SourceRecord) -> Result<Disposition, ProcessError> {
            match record.raw_content.as_str() {
                "ok" => Ok(Disposition::processed()),
                "filter" => Ok(Disposition::Filtered {
                    reason: "too small".to_string(),
                }),
                "flaky" => {
                    self.store_failures.fetch_add(1, Ordering::SeqCst);
                    Err(ProcessError::Store(anyhow::anyhow!("database is locked")))
                }
                _ => Err(ProcessError::MissingPrerequisite("video 1".to_string())),
            }
        }
    }

    fn runner(max_retries: u32) -> (EtlRunner, IngestionStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let records = IngestionStore::new(db);
        let runner = EtlRunner::with_processors(
            records.clone(),
            vec![Box::new(Scripted {
                store_failures: AtomicUsize::new(0),
            })],
            EtlOptions { max_retries },
        );
        (runner, records)
    }

    fn save(records: &IngestionStore, raw: &str) -> i64 {
        records
            .save(&NewRecord::fetched("scripted", "e", "", raw, RequestSnapshot::default()))
            .unwrap()
    }

    #[test]
    fn test_each_outcome_maps_to_one_transition() {
        let (runner, records) = runner(3);
        let ok = save(&records, "ok");
        let filtered = save(&records, "filter");
        let missing = save(&records, "missing");

        let summary = runner.run_for_type("scripted").unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.errored, 1);

        assert_eq!(records.get(ok).unwrap().unwrap().status, RecordStatus::Processed);
        let f = records.get(filtered).unwrap().unwrap();
        assert_eq!(f.status, RecordStatus::Filtered);
        assert_eq!(f.processing_log, "too small");
        let m = records.get(missing).unwrap().unwrap();
        assert_eq!(m.status, RecordStatus::Error);
        assert!(m.processing_log.contains("missing prerequisite"));

        // A second pass finds nothing to do: terminal records never move.
        let again = runner.run_for_type("scripted").unwrap();
        assert_eq!(again.total(), 0);
    }

    #[test]
    fn test_store_failures_retry_then_error() {
        let (runner, records) = runner(2);
        let id = save(&records, "flaky");

        let first = runner.run_for_type("scripted").unwrap();
        assert_eq!(first.retried, 1);
        let rec = records.get(id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Unprocessed);
        assert_eq!(rec.retries, 1);

        let second = runner.run_for_type("scripted").unwrap();
        assert_eq!(second.errored, 1);
        let rec = records.get(id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Error);
        assert!(rec.processing_log.starts_with("giving up after 2 attempts"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let (runner, _) = runner(3);
        assert!(runner.run_for_type("video_rank_year").is_err());
    }

    #[test]
    fn test_default_runner_covers_every_type() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let runner = EtlRunner::new(db, FilterThresholds::default(), EtlOptions::default());
        assert_eq!(
            runner.data_types(),
            vec![
                "video_rank_day",
                "video_rank_week",
                "video_rank_month",
                "video_summary",
                "video_trend"
            ]
        );
        let all = runner.run_all().unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|(_, s)| s.total() == 0));
    }
}
