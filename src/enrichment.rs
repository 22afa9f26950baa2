// 🏷️ Enrichment Stage - Classifier-backed categorization
// One classifier call per uncategorized record, every failure degrades to a sentinel

use chrono::Utc;
use rayon::prelude::*;
use std::time::Instant;

use crate::classifier::{ClassificationError, ClassificationOutcome, Classifier, HttpClassifier};
use crate::config::ClassifierConfig;
use crate::record::TransactionRecord;

// ============================================================================
// SENTINEL CATEGORIES
// ============================================================================

/// Well-formed classifier reply without a prediction
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Classifier unreachable, timed out, errored or replied with garbage
pub const API_ERROR_CATEGORY: &str = "API_ERROR";

/// How a record left the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Predicted,
    Unknown,
    ApiError,
    /// Already categorized upstream, classifier not called
    Skipped,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Predicted => "predicted",
            Disposition::Unknown => "unknown",
            Disposition::ApiError => "api_error",
            Disposition::Skipped => "skipped",
        }
    }

    fn of(outcome: &ClassificationOutcome) -> Self {
        match outcome {
            ClassificationOutcome::Predicted(category) if !category.is_empty() => {
                Disposition::Predicted
            }
            ClassificationOutcome::Predicted(_) | ClassificationOutcome::Absent => {
                Disposition::Unknown
            }
            ClassificationOutcome::Failed(_) => Disposition::ApiError,
        }
    }
}

/// Map a classification outcome to the category label stored on the record
/// An empty prediction is treated as no prediction
pub fn category_for(outcome: &ClassificationOutcome) -> String {
    match outcome {
        ClassificationOutcome::Predicted(category) if !category.is_empty() => category.clone(),
        ClassificationOutcome::Predicted(_) | ClassificationOutcome::Absent => {
            UNKNOWN_CATEGORY.to_string()
        }
        ClassificationOutcome::Failed(_) => API_ERROR_CATEGORY.to_string(),
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub predicted: usize,
    pub unknown: usize,
    pub api_error: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn record(&mut self, disposition: Disposition) {
        self.total += 1;
        match disposition {
            Disposition::Predicted => self.predicted += 1,
            Disposition::Unknown => self.unknown += 1,
            Disposition::ApiError => self.api_error += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }

    /// Share of classifier calls that ended in API_ERROR (skipped records excluded)
    pub fn api_error_rate(&self) -> f64 {
        let called = self.total - self.skipped;
        if called == 0 {
            return 0.0;
        }
        self.api_error as f64 / called as f64
    }

    /// True when the API_ERROR share is strictly above `threshold`
    pub fn exceeds_api_error_ratio(&self, threshold: f64) -> bool {
        self.api_error > 0 && self.api_error_rate() > threshold
    }

    pub fn summary(&self) -> String {
        format!(
            "{} transactions: {} predicted, {} unknown, {} api errors ({:.1}%), {} already categorized",
            self.total,
            self.predicted,
            self.unknown,
            self.api_error,
            self.api_error_rate() * 100.0,
            self.skipped
        )
    }
}

/// Enriched records in input order, plus counts
#[derive(Debug)]
pub struct BatchOutcome {
    pub records: Vec<TransactionRecord>,
    pub summary: BatchSummary,
}

// ============================================================================
// ENRICHMENT STAGE
// ============================================================================

pub struct EnrichmentStage<C = HttpClassifier> {
    classifier: C,
}

impl EnrichmentStage<HttpClassifier> {
    /// Build the stage around the HTTP classifier described by `config`
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassificationError> {
        Ok(Self::new(HttpClassifier::new(config.clone())?))
    }
}

impl<C: Classifier> EnrichmentStage<C> {
    pub fn new(classifier: C) -> Self {
        EnrichmentStage { classifier }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Assign a category to one record. Never fails.
    pub fn enrich(&self, record: TransactionRecord) -> TransactionRecord {
        self.enrich_one(record).0
    }

    /// Enrich and report how the category was obtained
    pub fn enrich_one(&self, mut record: TransactionRecord) -> (TransactionRecord, Disposition) {
        if record.is_categorized() {
            tracing::debug!(category = %record.category, "record already categorized, skipping");
            return (record, Disposition::Skipped);
        }

        let started = Instant::now();
        let outcome = self.classifier.classify(&record.description);
        let latency_ms = started.elapsed().as_millis();

        match &outcome {
            ClassificationOutcome::Predicted(category) => {
                tracing::debug!(category = %category, latency_ms = latency_ms as u64, "classified");
            }
            ClassificationOutcome::Absent => {
                tracing::debug!(latency_ms = latency_ms as u64, "classifier had no prediction");
            }
            ClassificationOutcome::Failed(ClassificationError::Status { status, body }) => {
                tracing::warn!(
                    status = *status,
                    body = %body,
                    "classifier returned an error status"
                );
            }
            ClassificationOutcome::Failed(err) => {
                tracing::warn!(
                    kind = err.kind(),
                    error = %err,
                    latency_ms = latency_ms as u64,
                    "classifier call failed"
                );
            }
        }

        let disposition = Disposition::of(&outcome);
        record.category = category_for(&outcome);
        record.set_classification_provenance(disposition.as_str(), Utc::now(), latency_ms);

        (record, disposition)
    }

    /// Enrich a batch on up to `parallelism` worker threads, keeping input order
    pub fn enrich_batch(&self, records: Vec<TransactionRecord>, parallelism: usize) -> BatchOutcome {
        let workers = parallelism.max(1);

        let results: Vec<(TransactionRecord, Disposition)> =
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => {
                    pool.install(|| records.into_par_iter().map(|r| self.enrich_one(r)).collect())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "worker pool unavailable, enriching sequentially");
                    records.into_iter().map(|r| self.enrich_one(r)).collect()
                }
            };

        let mut summary = BatchSummary::default();
        let mut enriched = Vec::with_capacity(results.len());
        for (record, disposition) in results {
            summary.record(disposition);
            enriched.push(record);
        }

        BatchOutcome {
            records: enriched,
            summary,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
