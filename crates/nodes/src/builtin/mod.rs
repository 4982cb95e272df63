//! Built-in preprocessing operators.
//!
//! Each operator is a unit struct; its tunables come from the task's JSON
//! config (see the `*Config` types) and its data from the staged upstream
//! output.

pub mod cleaning;
pub mod filtering;
pub mod loading;
pub mod sink;

use std::collections::HashMap;
use std::sync::Arc;

use notify::NotificationChannel;

use crate::ExecutableNode;

pub use cleaning::{AbuseConfig, AnonymizeSensitiveData, CleanRecords, RemoveAbusiveData};
pub use filtering::{
    AggregateFiltered, FilterByLanguage, FilterByWordCountAndDate, LanguageConfig,
    WordCountDateConfig,
};
pub use loading::{LoadConfig, LoadData, ValidateConfig, ValidateDataQuality};
pub use sink::{InsertToWarehouse, SendSuccessNotification, WarehouseConfig};

pub const LOAD_DATA: &str = "load_data";
pub const VALIDATE_DATA_QUALITY: &str = "validate_data_quality";
pub const FILTER_BY_WORD_COUNT_AND_DATE: &str = "filter_by_word_count_and_date";
pub const FILTER_BY_LANGUAGE: &str = "filter_by_language";
pub const AGGREGATE_FILTERED: &str = "aggregate_filtered";
pub const CLEAN_RECORDS: &str = "clean_records";
pub const ANONYMIZE_SENSITIVE_DATA: &str = "anonymize_sensitive_data";
pub const REMOVE_ABUSIVE_DATA: &str = "remove_abusive_data";
pub const INSERT_TO_WAREHOUSE: &str = "insert_to_warehouse";
pub const SEND_SUCCESS_NOTIFICATION: &str = "send_success_notification";

/// Every built-in operator keyed by its operator name.
pub fn registry(channel: NotificationChannel) -> HashMap<String, Arc<dyn ExecutableNode>> {
    let entries: Vec<(&str, Arc<dyn ExecutableNode>)> = vec![
        (LOAD_DATA, Arc::new(LoadData)),
        (VALIDATE_DATA_QUALITY, Arc::new(ValidateDataQuality)),
        (FILTER_BY_WORD_COUNT_AND_DATE, Arc::new(FilterByWordCountAndDate)),
        (FILTER_BY_LANGUAGE, Arc::new(FilterByLanguage)),
        (AGGREGATE_FILTERED, Arc::new(AggregateFiltered)),
        (CLEAN_RECORDS, Arc::new(CleanRecords)),
        (ANONYMIZE_SENSITIVE_DATA, Arc::new(AnonymizeSensitiveData)),
        (REMOVE_ABUSIVE_DATA, Arc::new(RemoveAbusiveData)),
        (INSERT_TO_WAREHOUSE, Arc::new(InsertToWarehouse)),
        (SEND_SUCCESS_NOTIFICATION, Arc::new(SendSuccessNotification::new(channel))),
    ];

    entries
        .into_iter()
        .map(|(name, node)| (name.to_owned(), node))
        .collect()
}
