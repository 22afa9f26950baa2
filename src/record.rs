use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transaction record flowing through the import batch
/// Only `description` and `category` matter to enrichment, the rest is passthrough
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransactionRecord {
    // ========================================================================
    // PASSTHROUGH FIELDS (opaque to enrichment)
    // ========================================================================
    #[serde(rename = "Date", alias = "date", default)]
    pub date: String,

    #[serde(rename = "Description", alias = "description", default)]
    pub description: String,

    #[serde(rename = "Amount", alias = "amount", default)]
    pub amount: String,

    #[serde(rename = "Account", alias = "account", default)]
    pub account: String,

    // ========================================================================
    // ENRICHED FIELD
    // ========================================================================
    /// Empty on input, set exactly once by the enrichment stage
    #[serde(rename = "Category", alias = "category", default)]
    pub category: String,

    // ========================================================================
    // EXTENSIBLE METADATA (never part of the flat CSV schema)
    // ========================================================================
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransactionRecord {
    /// Create a record with an empty category
    pub fn new(date: &str, description: &str, amount: &str, account: &str) -> Self {
        Self {
            date: date.to_string(),
            description: description.to_string(),
            amount: amount.to_string(),
            account: account.to_string(),
            category: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// True when an upstream step already assigned a category
    pub fn is_categorized(&self) -> bool {
        !self.category.is_empty()
    }

    /// Record how the category was obtained
    pub fn set_classification_provenance(
        &mut self,
        outcome: &str,
        classified_at: DateTime<Utc>,
        latency_ms: u128,
    ) {
        self.metadata.insert(
            "classification_outcome".to_string(),
            serde_json::json!(outcome),
        );
        self.metadata.insert(
            "classified_at".to_string(),
            serde_json::json!(classified_at.to_rfc3339()),
        );
        self.metadata.insert(
            "classifier_latency_ms".to_string(),
            serde_json::json!(latency_ms as u64),
        );
    }

    /// Get metadata value by key
    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Check if metadata key exists
    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }
}
