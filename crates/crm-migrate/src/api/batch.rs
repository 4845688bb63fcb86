//! Chunked bulk create and associate.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use super::retry::{RetryPolicy, UnitOutcome};
use super::transport::CrmTransport;
use super::Throttle;
use crate::record::RecordType;
use crate::runlog::RunLog;

/// Bulk operation kinds and their destination-imposed chunk limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Associate,
}

impl OperationKind {
    pub fn chunk_size(&self) -> usize {
        match self {
            OperationKind::Create => 100,
            OperationKind::Associate => 500,
        }
    }
}

/// Who defined an association type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationCategory {
    #[default]
    HubspotDefined,
    UserDefined,
    IntegratorDefined,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssociationTypeWire {
    association_category: AssociationCategory,
    association_type_id: u32,
}

#[derive(Serialize)]
struct IdRef<'a> {
    id: &'a str,
}

/// A typed link between two existing destination records.
///
/// Only constructible when both ends carry a destination id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationInput {
    from_id: String,
    to_id: String,
    category: AssociationCategory,
    type_id: u32,
}

impl AssociationInput {
    pub fn new(
        from_id: &str,
        to_id: &str,
        category: AssociationCategory,
        type_id: u32,
    ) -> Option<Self> {
        if from_id.is_empty() || to_id.is_empty() {
            return None;
        }
        Some(Self {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            category,
            type_id,
        })
    }

    pub fn from_id(&self) -> &str {
        &self.from_id
    }

    pub fn to_id(&self) -> &str {
        &self.to_id
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }
}

impl Serialize for AssociationInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            types: [AssociationTypeWire; 1],
            from: IdRef<'a>,
            to: IdRef<'a>,
        }

        Wire {
            types: [AssociationTypeWire {
                association_category: self.category,
                association_type_id: self.type_id,
            }],
            from: IdRef { id: &self.from_id },
            to: IdRef { id: &self.to_id },
        }
        .serialize(serializer)
    }
}

/// An association embedded in a create input; the record being created is
/// the implicit source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTarget {
    to_id: String,
    category: AssociationCategory,
    type_id: u32,
}

impl AssociationTarget {
    pub fn new(to_id: &str, category: AssociationCategory, type_id: u32) -> Option<Self> {
        if to_id.is_empty() {
            return None;
        }
        Some(Self {
            to_id: to_id.to_string(),
            category,
            type_id,
        })
    }

    pub fn to_id(&self) -> &str {
        &self.to_id
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }
}

impl Serialize for AssociationTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            types: [AssociationTypeWire; 1],
            to: IdRef<'a>,
        }

        Wire {
            types: [AssociationTypeWire {
                association_category: self.category,
                association_type_id: self.type_id,
            }],
            to: IdRef { id: &self.to_id },
        }
        .serialize(serializer)
    }
}

/// One record to create.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WriteInput {
    pub properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<AssociationTarget>,
}

impl WriteInput {
    pub fn new(properties: BTreeMap<String, String>) -> Self {
        Self {
            properties,
            associations: Vec::new(),
        }
    }

    pub fn with_association(mut self, target: AssociationTarget) -> Self {
        self.associations.push(target);
        self
    }
}

/// A write input that can be matched against one entry of a response's
/// `results`, so inputs missing from a partial response can be named.
pub trait BatchInput: Serialize {
    fn confirmed_by(&self, result: &Value) -> bool;
}

/// Reads an id that may come back as a JSON number or string.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl BatchInput for AssociationInput {
    fn confirmed_by(&self, result: &Value) -> bool {
        let from = result
            .get("fromObjectId")
            .or_else(|| result.pointer("/from/id"))
            .and_then(id_text);
        let to = result
            .get("toObjectId")
            .or_else(|| result.pointer("/to/id"))
            .and_then(id_text);
        from.as_deref() == Some(self.from_id.as_str()) && to.as_deref() == Some(self.to_id.as_str())
    }
}

impl BatchInput for WriteInput {
    fn confirmed_by(&self, result: &Value) -> bool {
        let Some(properties) = result.get("properties") else {
            return false;
        };
        self.properties
            .iter()
            .all(|(name, value)| properties.get(name).and_then(Value::as_str) == Some(value.as_str()))
    }
}

/// Chunk positions with no matching entry in `results`.
///
/// A response holding at least one result per input confirms the whole
/// chunk. Otherwise each input claims the first unclaimed result it matches.
fn unconfirmed<T: BatchInput>(chunk: &[T], results: &[Value]) -> Vec<usize> {
    if results.len() >= chunk.len() {
        return Vec::new();
    }
    let mut claimed = vec![false; results.len()];
    chunk
        .iter()
        .enumerate()
        .filter_map(|(position, input)| {
            let found = results
                .iter()
                .enumerate()
                .position(|(j, result)| !claimed[j] && input.confirmed_by(result));
            match found {
                Some(j) => {
                    claimed[j] = true;
                    None
                }
                None => Some(position),
            }
        })
        .collect()
}

#[derive(Serialize)]
struct InputsBody<'a, T> {
    inputs: &'a [T],
}

/// What a batch write produced.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Results of every successful chunk, concatenated in chunk order.
    pub results: Vec<Value>,
    /// Input index ranges of the chunks that were dropped.
    pub dropped: Vec<Range<usize>>,
    /// Inputs of successful chunks that the response did not confirm.
    pub rejected: Vec<usize>,
    /// Number of chunks submitted.
    pub chunks: usize,
}

impl BatchOutcome {
    /// Number of inputs that were in dropped chunks.
    pub fn dropped_inputs(&self) -> usize {
        self.dropped.iter().map(|r| r.len()).sum()
    }

    /// Whether the input at `index` was in a dropped chunk.
    pub fn is_dropped(&self, index: usize) -> bool {
        self.dropped.iter().any(|r| r.contains(&index))
    }

    /// Inputs that were dropped with their chunk or rejected individually.
    pub fn failed_inputs(&self) -> usize {
        self.dropped_inputs() + self.rejected.len()
    }

    /// Whether the input at `index` was not written.
    pub fn is_failed(&self, index: usize) -> bool {
        self.is_dropped(index) || self.rejected.contains(&index)
    }
}

/// Submits inputs chunk by chunk, isolating failures per chunk.
pub struct BatchWriteClient {
    transport: Arc<dyn CrmTransport>,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl BatchWriteClient {
    pub fn new(transport: Arc<dyn CrmTransport>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            transport,
            retry,
            throttle,
        }
    }

    /// Create `inputs` as new `record_type` records.
    pub async fn create(
        &self,
        record_type: RecordType,
        inputs: &[WriteInput],
        log: &mut RunLog,
    ) -> BatchOutcome {
        let path = format!("/crm/v3/objects/{}/batch/create", record_type.api_name());
        let label = format!("create {}", record_type);
        let outcome = self
            .write_batch(OperationKind::Create, &path, &label, inputs, log)
            .await;
        log.info(format!(
            "Total {} created: {}",
            record_type,
            outcome.results.len()
        ));
        outcome
    }

    /// Link existing `from` records to existing `to` records.
    pub async fn associate(
        &self,
        from: RecordType,
        to: RecordType,
        inputs: &[AssociationInput],
        log: &mut RunLog,
    ) -> BatchOutcome {
        let path = format!(
            "/crm/v4/associations/{}/{}/batch/create",
            from.api_name(),
            to.api_name()
        );
        let label = format!("associate {} to {}", from, to);
        let outcome = self
            .write_batch(OperationKind::Associate, &path, &label, inputs, log)
            .await;
        log.info(format!(
            "Total {} to {} associated: {}",
            from,
            to,
            outcome.results.len()
        ));
        outcome
    }

    async fn write_batch<T: BatchInput>(
        &self,
        kind: OperationKind,
        path: &str,
        label: &str,
        inputs: &[T],
        log: &mut RunLog,
    ) -> BatchOutcome {
        let size = kind.chunk_size();
        let total = inputs.len().div_ceil(size);
        let mut outcome = BatchOutcome::default();

        for (index, chunk) in inputs.chunks(size).enumerate() {
            let start = index * size;
            let range = start..start + chunk.len();
            let unit = format!("{} batch {}/{}", label, index + 1, total);
            log.info(unit.clone());
            outcome.chunks += 1;

            let body = match serde_json::to_value(InputsBody { inputs: chunk }) {
                Ok(body) => body,
                Err(e) => {
                    log.error(format!("Error encoding {}: {}", unit, e));
                    outcome.dropped.push(range);
                    continue;
                }
            };

            let transport = &self.transport;
            let body = &body;
            let result = self
                .retry
                .execute(&unit, log, || async move { transport.post_json(path, body).await })
                .await;

            match result {
                UnitOutcome::Success(response) => {
                    let results = response
                        .get("results")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    if let Some(errors) = response.get("errors").and_then(Value::as_array) {
                        if !errors.is_empty() {
                            log.warn(format!("{}: {} errors reported", unit, errors.len()));
                        }
                    }
                    log.info(format!("{}: {} results", unit, results.len()));
                    let rejected = unconfirmed(chunk, &results);
                    if !rejected.is_empty() {
                        log.warn(format!("{}: {} inputs rejected", unit, rejected.len()));
                        outcome.rejected.extend(rejected.into_iter().map(|p| start + p));
                    }
                    outcome.results.extend(results);
                }
                UnitOutcome::Dropped { .. } => outcome.dropped.push(range),
            }

            self.throttle.pause().await;
        }

        if !outcome.dropped.is_empty() {
            log.warn(format!(
                "{}: {} inputs omitted in {} dropped chunks",
                label,
                outcome.dropped_inputs(),
                outcome.dropped.len()
            ));
        }
        if !outcome.rejected.is_empty() {
            log.warn(format!(
                "{}: {} inputs rejected by the destination",
                label,
                outcome.rejected.len()
            ));
        }
        outcome
    }
}
