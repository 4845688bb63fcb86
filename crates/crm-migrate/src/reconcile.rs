//! External-id to destination-id reconciliation.
//!
//! Joins the external ids a run cares about against records returned by
//! search, using the property that carries the external id on the
//! destination side.
//!
//! When several destination records share one external id, the first one
//! in result order wins. The destination does not promise a stable order,
//! so on duplicates the chosen id can differ between runs.

use std::collections::HashMap;

use crate::api::DestinationRecord;
use crate::record::{RecordType, SourceRecord};

/// External id → destination id for one record type within one run.
///
/// A missing key means no match was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationMap {
    entries: HashMap<String, String>,
}

impl ReconciliationMap {
    pub fn get(&self, external_id: &str) -> Option<&str> {
        self.entries.get(external_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reconciles one record type.
#[derive(Debug, Clone)]
pub struct IdReconciler {
    record_type: RecordType,
    external_id_property: String,
}

impl IdReconciler {
    pub fn new(record_type: RecordType, external_id_property: impl Into<String>) -> Self {
        Self {
            record_type,
            external_id_property: external_id_property.into(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Map every id in `source_ids` that has a destination match.
    pub fn reconcile<'a, I>(&self, source_ids: I, destination: &[DestinationRecord]) -> ReconciliationMap
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index: HashMap<&str, &str> = HashMap::with_capacity(destination.len());
        for record in destination {
            if let Some(ext_id) = record.property(&self.external_id_property) {
                if !ext_id.is_empty() {
                    index.entry(ext_id).or_insert(record.id.as_str());
                }
            }
        }

        let entries = source_ids
            .into_iter()
            .filter_map(|ext_id| {
                index
                    .get(ext_id)
                    .map(|dest_id| (ext_id.to_string(), dest_id.to_string()))
            })
            .collect();

        ReconciliationMap { entries }
    }

    /// Reconcile and attach results to `records`, reading each record's
    /// external id for this type through `key`. Returns how many records
    /// were resolved.
    pub fn attach<F>(
        &self,
        records: &mut [SourceRecord],
        destination: &[DestinationRecord],
        key: F,
    ) -> usize
    where
        F: Fn(&SourceRecord) -> Option<String>,
    {
        let keys: Vec<Option<String>> = records.iter().map(&key).collect();
        let map = self.reconcile(keys.iter().flatten().map(String::as_str), destination);

        let mut resolved = 0;
        for (record, key) in records.iter_mut().zip(keys) {
            if let Some(dest_id) = key.as_deref().and_then(|k| map.get(k)) {
                record.resolve(self.record_type, dest_id);
                resolved += 1;
            }
        }
        resolved
    }
}
