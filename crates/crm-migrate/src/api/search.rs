//! Paginated search against a record type.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::retry::{CallError, RetryPolicy, UnitOutcome};
use super::transport::CrmTransport;
use super::Throttle;
use crate::record::RecordType;
use crate::runlog::RunLog;

/// Largest value list the destination accepts in one `IN` filter, and the
/// page size used for id lookups.
pub const MAX_FILTER_VALUES: usize = 100;

/// Search filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
    NotIn,
    HasProperty,
    NotHasProperty,
    ContainsToken,
    NotContainsToken,
}

/// One filter: `{propertyName, operator, value | values}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: Operator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl Filter {
    fn bare(property: &str, operator: Operator) -> Self {
        Self {
            property_name: property.to_string(),
            operator,
            value: None,
            high_value: None,
            values: None,
        }
    }

    /// Comparison against a single value (`EQ`, `NEQ`, `LT`, ...).
    pub fn compare(property: &str, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::bare(property, operator)
        }
    }

    /// `property IN values`.
    pub fn in_values(property: &str, values: Vec<String>) -> Self {
        Self {
            values: Some(values),
            ..Self::bare(property, Operator::In)
        }
    }

    /// `property NOT_IN values`.
    pub fn not_in_values(property: &str, values: Vec<String>) -> Self {
        Self {
            values: Some(values),
            ..Self::bare(property, Operator::NotIn)
        }
    }

    pub fn has_property(property: &str) -> Self {
        Self::bare(property, Operator::HasProperty)
    }

    pub fn not_has_property(property: &str) -> Self {
        Self::bare(property, Operator::NotHasProperty)
    }

    /// Inclusive range check.
    pub fn between(property: &str, low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            value: Some(low.into()),
            high_value: Some(high.into()),
            ..Self::bare(property, Operator::Between)
        }
    }
}

/// Filters inside a group are AND-ed; groups are OR-ed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub property_name: String,
    pub direction: SortDirection,
}

/// A search query, minus the paging cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub filter_groups: Vec<FilterGroup>,
    pub properties: Vec<String>,
    pub limit: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<Sort>,
}

impl SearchRequest {
    /// Look up records whose `property` is one of `values`.
    pub fn membership(property: &str, values: Vec<String>) -> Self {
        Self {
            filter_groups: vec![FilterGroup {
                filters: vec![Filter::in_values(property, values)],
            }],
            properties: vec![property.to_string()],
            limit: MAX_FILTER_VALUES,
            sorts: Vec::new(),
        }
    }
}

/// A record returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DestinationRecord {
    pub id: String,
    #[serde(default)]
    pub properties: HashMap<String, Option<String>>,
}

impl DestinationRecord {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_deref())
    }
}

#[derive(Serialize)]
struct SearchBody<'a> {
    #[serde(flatten)]
    request: &'a SearchRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<DestinationRecord>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Deserialize)]
struct NextPage {
    after: Option<String>,
}

impl SearchPage {
    fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .and_then(|n| n.after.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Follows search cursors to completion.
pub struct PaginatedSearchClient {
    transport: Arc<dyn CrmTransport>,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl PaginatedSearchClient {
    pub fn new(transport: Arc<dyn CrmTransport>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            transport,
            retry,
            throttle,
        }
    }

    /// Fetch every page of `request` against `record_type`.
    ///
    /// Results keep the order the destination returned them in. A page that
    /// is dropped after retries ends the search; what was collected so far
    /// is returned and the gap is logged.
    pub async fn search(
        &self,
        record_type: RecordType,
        request: &SearchRequest,
        log: &mut RunLog,
    ) -> Vec<DestinationRecord> {
        let path = format!("/crm/v3/objects/{}/search", record_type.api_name());
        let mut records = Vec::new();
        let mut consumed: HashSet<String> = HashSet::new();
        let mut after: Option<String> = None;
        let mut page = 0usize;

        loop {
            page += 1;
            let body = match serde_json::to_value(SearchBody {
                request,
                after: after.as_deref(),
            }) {
                Ok(body) => body,
                Err(e) => {
                    log.error(format!("Error encoding {} search: {}", record_type, e));
                    break;
                }
            };

            let unit = format!("{} search page {}", record_type, page);
            let transport = &self.transport;
            let (path, body) = (path.as_str(), &body);
            let outcome = self
                .retry
                .execute(&unit, log, || async move {
                    let value = transport.post_json(path, body).await?;
                    serde_json::from_value::<SearchPage>(value)
                        .map_err(|e| CallError::Decode(e.to_string()))
                })
                .await;
            self.throttle.pause().await;

            let result = match outcome {
                UnitOutcome::Success(result) => result,
                UnitOutcome::Dropped { .. } => {
                    log.warn(format!(
                        "{} search incomplete: page {} dropped, {} records retrieved",
                        record_type,
                        page,
                        records.len()
                    ));
                    break;
                }
            };

            log.info(format!(
                "Retrieved {}: {}",
                record_type,
                result.results.len()
            ));
            let next = result.next_cursor().map(str::to_string);
            records.extend(result.results);

            if let Some(cursor) = after.take() {
                consumed.insert(cursor);
            }
            match next {
                Some(cursor) if consumed.contains(&cursor) => {
                    log.warn(format!(
                        "{} search returned an already used cursor {}; stopping",
                        record_type, cursor
                    ));
                    break;
                }
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn client(transport: Arc<ScriptedTransport>) -> PaginatedSearchClient {
        PaginatedSearchClient::new(transport, RetryPolicy::new(), Throttle::none())
    }

    fn page(start: usize, len: usize, next: Option<&str>) -> serde_json::Value {
        let results: Vec<_> = (start..start + len)
            .map(|i| json!({"id": format!("{}", 1000 + i), "properties": {"ext_id": format!("E{}", i)}}))
            .collect();
        match next {
            Some(after) => json!({"results": results, "paging": {"next": {"after": after}}}),
            None => json!({"results": results}),
        }
    }

    #[test]
    fn test_request_serialization() {
        let mut request = SearchRequest::membership("ext_id", vec!["A".into(), "B".into()]);
        request.filter_groups.push(FilterGroup {
            filters: vec![
                Filter::has_property("amount"),
                Filter::between("amount", "10", "20"),
                Filter::compare("stage", Operator::Neq, "closed"),
            ],
        });
        let value = serde_json::to_value(SearchBody {
            request: &request,
            after: Some("200"),
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "filterGroups": [
                    {"filters": [{"propertyName": "ext_id", "operator": "IN", "values": ["A", "B"]}]},
                    {"filters": [
                        {"propertyName": "amount", "operator": "HAS_PROPERTY"},
                        {"propertyName": "amount", "operator": "BETWEEN", "value": "10", "highValue": "20"},
                        {"propertyName": "stage", "operator": "NEQ", "value": "closed"}
                    ]}
                ],
                "properties": ["ext_id"],
                "limit": 100,
                "after": "200"
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_cursors_to_completion() {
        let transport = Arc::new(ScriptedTransport::new(|_, body| {
            match body.get("after").and_then(|a| a.as_str()) {
                None => Ok(page(0, 100, Some("100"))),
                Some("100") => Ok(page(100, 100, Some("200"))),
                Some("200") => Ok(page(200, 50, None)),
                Some(other) => panic!("unexpected cursor {}", other),
            }
        }));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["E0".into()]);

        let records = client(transport.clone())
            .search(RecordType::Deals, &request, &mut log)
            .await;

        assert_eq!(records.len(), 250);
        assert_eq!(records[0].id, "1000");
        assert_eq!(records[249].property("ext_id"), Some("E249"));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.path == "/crm/v3/objects/deals/search"));
        let cursors: Vec<_> = calls
            .iter()
            .map(|c| c.body.get("after").and_then(|a| a.as_str()).map(str::to_string))
            .collect();
        assert_eq!(cursors, vec![None, Some("100".into()), Some("200".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_page_without_paging() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(json!({"results": []}))));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["X".into()]);

        let records = client(transport.clone())
            .search(RecordType::Companies, &request, &mut log)
            .await;

        assert!(records.is_empty());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_page_returns_partial_results() {
        let transport = Arc::new(ScriptedTransport::new(|_, body| {
            match body.get("after").and_then(|a| a.as_str()) {
                None => Ok(page(0, 100, Some("100"))),
                _ => Err(CallError::status(400, "bad request")),
            }
        }));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["E0".into()]);

        let records = client(transport.clone())
            .search(RecordType::Contacts, &request, &mut log)
            .await;

        assert_eq!(records.len(), 100);
        assert_eq!(transport.calls().len(), 2);
        assert!(log.contains("page 2 dropped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_page_is_retried_with_same_cursor() {
        let limited = AtomicBool::new(false);
        let transport = Arc::new(ScriptedTransport::new(move |_, body| {
            match body.get("after").and_then(|a| a.as_str()) {
                None => Ok(page(0, 100, Some("100"))),
                Some("100") if !limited.swap(true, Ordering::SeqCst) => {
                    Err(CallError::status(429, "rate limited"))
                }
                Some("100") => Ok(page(100, 100, Some("200"))),
                Some("200") => Ok(page(200, 30, None)),
                Some(other) => panic!("unexpected cursor {}", other),
            }
        }));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["E0".into()]);
        let start = Instant::now();

        let records = client(transport.clone())
            .search(RecordType::Deals, &request, &mut log)
            .await;

        assert_eq!(records.len(), 230);
        let cursors: Vec<_> = transport
            .calls()
            .iter()
            .map(|c| c.body.get("after").and_then(|a| a.as_str()).map(str::to_string))
            .collect();
        assert_eq!(
            cursors,
            vec![None, Some("100".into()), Some("100".into()), Some("200".into())]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(log.contains("(deals search page 2). Retrying after 2 seconds"));
        assert!(!log.contains("dropped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_cursor_stops_search() {
        let transport = Arc::new(ScriptedTransport::new(|_, body| {
            match body.get("after").and_then(|a| a.as_str()) {
                None => Ok(page(0, 10, Some("10"))),
                Some(_) => Ok(page(10, 10, Some("10"))),
            }
        }));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["E0".into()]);

        let records = client(transport.clone())
            .search(RecordType::Deals, &request, &mut log)
            .await;

        assert_eq!(records.len(), 20);
        assert_eq!(transport.calls().len(), 2);
        assert!(log.contains("already used cursor"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_page_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(json!({"results": "nope"}))));
        let mut log = RunLog::new();
        let request = SearchRequest::membership("ext_id", vec!["E0".into()]);

        let records = client(transport.clone())
            .search(RecordType::Deals, &request, &mut log)
            .await;

        assert!(records.is_empty());
        assert_eq!(transport.calls().len(), 1);
        assert!(log.contains("malformed response"));
    }
}
