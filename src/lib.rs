// Transaction Enrichment - Core Library
// Exposes the enrichment stage for the batch driver and tests

pub mod record;
pub mod config;
pub mod classifier;     // Classification service client
pub mod enrichment;     // Enrichment stage + sentinel mapping
pub mod batch;          // CSV / JSONL record source and sink

// Re-export commonly used types
pub use record::TransactionRecord;
pub use config::{
    BatchConfig, ClassifierConfig, ConfigError, ConfigOverrides, FileConfig, Settings,
};
pub use classifier::{
    ClassificationError, ClassificationOutcome, ClassificationRequest, ClassificationResponse,
    Classifier, HttpClassifier,
};
pub use enrichment::{
    category_for, BatchOutcome, BatchSummary, Disposition, EnrichmentStage,
    API_ERROR_CATEGORY, UNKNOWN_CATEGORY,
};
pub use batch::{read_records, write_records, RecordFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
