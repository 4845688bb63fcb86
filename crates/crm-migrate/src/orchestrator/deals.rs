//! Deal association job: link deals to their companies and contacts.

use std::path::Path;

use super::{JobReport, Orchestrator};
use crate::api::AssociationInput;
use crate::error::Result;
use crate::record::{RecordType, ResidueReason, SourceRecord};
use crate::runlog::RunLog;
use crate::source;

const DEALS_STAGE: &str = "deals";

/// One deal reference column and how to link it.
struct DealLink {
    target: RecordType,
    column: String,
    type_id: u32,
    stage: &'static str,
}

impl Orchestrator {
    pub(super) async fn associate_deals(
        &self,
        source_file: &Path,
        log: &mut RunLog,
    ) -> Result<JobReport> {
        let path = self.config.paths.data_dir.join(source_file);
        let mut records = source::load_csv(&path, &self.config.deals.id_column)?;
        log.info(format!("Total deals to process: {}", records.len()));
        let mut report = JobReport::new(records.len());

        let resolved = self
            .resolve(
                &mut records,
                RecordType::Deals,
                |r| Some(r.external_id().to_string()).filter(|id| !id.is_empty()),
                log,
            )
            .await;
        for record in records
            .iter()
            .filter(|r| r.resolved_id(RecordType::Deals).is_none())
        {
            report
                .residue
                .push(record, DEALS_STAGE, ResidueReason::UnmatchedRecord);
        }
        if resolved < records.len() {
            log.warn(format!(
                "No destination deal for {} rows",
                records.len() - resolved
            ));
        }
        report.stage(DEALS_STAGE, records.len(), resolved);

        let links = [
            (
                RecordType::Companies,
                &self.config.deals.company_column,
                self.config.associations.deal_to_company,
                "deal_companies",
            ),
            (
                RecordType::Contacts,
                &self.config.deals.contact_column,
                self.config.associations.deal_to_contact,
                "deal_contacts",
            ),
        ];
        for (target, column, type_id, stage) in links {
            let Some(column) = column.clone() else {
                continue;
            };
            let link = DealLink {
                target,
                column,
                type_id,
                stage,
            };
            self.associate_references(&mut records, &link, &mut report, log)
                .await;
        }

        Ok(report)
    }

    /// Resolve one reference column and associate every deal whose
    /// reference resolved.
    async fn associate_references(
        &self,
        records: &mut [SourceRecord],
        link: &DealLink,
        report: &mut JobReport,
        log: &mut RunLog,
    ) {
        let column = link.column.as_str();
        self.resolve(
            records,
            link.target,
            |r| {
                r.resolved_id(RecordType::Deals)
                    .and(r.get(column))
                    .map(str::to_string)
            },
            log,
        )
        .await;

        let category = self.config.associations.category;
        let mut inputs = Vec::new();
        let mut owners = Vec::new();
        let mut attempted = 0;

        for (index, record) in records.iter().enumerate() {
            let Some(deal_id) = record.resolved_id(RecordType::Deals) else {
                continue;
            };
            if record.get(column).is_none() {
                continue;
            }
            attempted += 1;

            let input = record
                .resolved_id(link.target)
                .and_then(|to_id| AssociationInput::new(deal_id, to_id, category, link.type_id));
            match input {
                Some(input) => {
                    inputs.push(input);
                    owners.push(index);
                }
                None => report.residue.push(
                    record,
                    link.stage,
                    ResidueReason::UnmatchedReference(link.target),
                ),
            }
        }

        log.info(format!(
            "Total deal to {} associations to create: {}",
            link.target,
            inputs.len()
        ));
        let outcome = self
            .writer
            .associate(RecordType::Deals, link.target, &inputs, log)
            .await;

        for (position, owner) in owners.iter().enumerate() {
            if outcome.is_failed(position) {
                report
                    .residue
                    .push(&records[*owner], link.stage, ResidueReason::WriteDropped);
            }
        }
        report.stage(
            link.stage,
            attempted,
            inputs.len() - outcome.failed_inputs(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::{MigrationJob, MigrationResult};
    use super::*;
    use crate::api::CallError;
    use crate::testing::{search_response, test_config, ScriptedTransport};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn write_deals(root: &Path, rows: &[(String, String, String)]) {
        let data = root.join("data");
        std::fs::create_dir_all(&data).unwrap();
        let mut csv = String::from("Id,Name,AccountId,ContactId\n");
        for (id, account, contact) in rows {
            csv.push_str(&format!("{},Deal {},{},{}\n", id, id, account, contact));
        }
        std::fs::write(data.join("deals.csv"), csv).unwrap();
    }

    fn number(value: &str) -> usize {
        value[1..].parse().unwrap()
    }

    fn echo_associations(body: &Value) -> Value {
        json!({ "results": body["inputs"].clone() })
    }

    fn stage<'a>(result: &'a MigrationResult, name: &str) -> &'a super::super::StageSummary {
        result.stages.iter().find(|s| s.name == name).unwrap()
    }

    async fn run(root: &Path, transport: Arc<ScriptedTransport>) -> MigrationResult {
        let orchestrator = Orchestrator::with_transport(test_config(root), transport);
        orchestrator
            .run(MigrationJob::AssociateDeals {
                source_file: PathBuf::from("deals.csv"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_250_deals_resolve_and_associate_resolved_companies() {
        let dir = tempfile::tempdir().unwrap();
        // 245 of 250 deals reference a distinct company; 230 companies exist.
        let rows: Vec<_> = (0..250)
            .map(|i| {
                let account = if i < 245 { format!("C{:03}", i) } else { String::new() };
                (format!("D{:03}", i), account, String::new())
            })
            .collect();
        write_deals(dir.path(), &rows);

        let transport = Arc::new(ScriptedTransport::new(|path, body| {
            if path == "/crm/v3/objects/deals/search" {
                Ok(search_response(body, |_| true, |v| format!("hs-{}", v)))
            } else if path == "/crm/v3/objects/companies/search" {
                Ok(search_response(body, |v| number(v) < 230, |v| format!("hs-{}", v)))
            } else if path.starts_with("/crm/v4/associations/deals/companies") {
                Ok(echo_associations(body))
            } else {
                Err(CallError::status(404, path.to_string()))
            }
        }));

        let result = run(dir.path(), transport.clone()).await;

        let deal_searches = transport.calls_to("/objects/deals/search");
        assert_eq!(deal_searches.len(), 3);
        let group_sizes: Vec<usize> = deal_searches
            .iter()
            .map(|c| c.body["filterGroups"][0]["filters"][0]["values"].as_array().unwrap().len())
            .collect();
        assert_eq!(group_sizes, vec![100, 100, 50]);
        assert_eq!(transport.calls_to("/objects/companies/search").len(), 3);
        assert!(transport.calls_to("/objects/contacts/search").is_empty());

        let deals = stage(&result, "deals");
        assert_eq!((deals.attempted, deals.succeeded, deals.residue), (250, 250, 0));

        let associations = transport.calls_to("/associations/deals/companies");
        assert_eq!(associations.len(), 1);
        let inputs = associations[0].body["inputs"].as_array().unwrap();
        assert_eq!(inputs.len(), 230);
        assert_eq!(inputs[0]["from"]["id"], "hs-D000");
        assert_eq!(inputs[0]["to"]["id"], "hs-C000");
        assert_eq!(inputs[0]["types"][0]["associationTypeId"], 5);

        let companies = stage(&result, "deal_companies");
        assert_eq!(
            (companies.attempted, companies.succeeded, companies.residue),
            (245, 230, 15)
        );
        assert_eq!(result.residue_count, 15);
        let residue = std::fs::read_to_string(result.residue_file.unwrap()).unwrap();
        assert_eq!(residue.lines().count(), 16);
        assert!(residue.contains("\"D244\""));
        assert!(residue.contains("no destination companies"));
    }

    #[tokio::test]
    async fn test_association_gating_and_dropped_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<_> = (0..10)
            .map(|i| (format!("D{}", i), format!("C{}", i), format!("P{}", i)))
            .collect();
        write_deals(dir.path(), &rows);

        let transport = Arc::new(ScriptedTransport::new(|path, body| {
            if path.ends_with("/companies/search") {
                Ok(search_response(body, |v| number(v) < 7, |v| format!("hs-{}", v)))
            } else if path.ends_with("/search") {
                Ok(search_response(body, |_| true, |v| format!("hs-{}", v)))
            } else if path.contains("/deals/contacts/") {
                Err(CallError::status(403, "missing scopes"))
            } else {
                Ok(echo_associations(body))
            }
        }));

        let result = run(dir.path(), transport.clone()).await;

        let company_inputs = &transport.calls_to("/associations/deals/companies")[0].body["inputs"];
        assert_eq!(company_inputs.as_array().unwrap().len(), 7);

        let contacts = transport.calls_to("/associations/deals/contacts");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].body["inputs"][0]["types"][0]["associationTypeId"], 3);

        let companies = stage(&result, "deal_companies");
        assert_eq!((companies.succeeded, companies.residue), (7, 3));
        let contacts = stage(&result, "deal_contacts");
        assert_eq!((contacts.attempted, contacts.succeeded, contacts.residue), (10, 0, 10));
        assert_eq!(result.residue_count, 13);

        let log = std::fs::read_to_string(result.log_file.unwrap()).unwrap();
        assert!(log.contains("Error in associate deals to contacts batch 1/1"));
    }

    #[tokio::test]
    async fn test_unmatched_deal_skips_reference_resolution() {
        let dir = tempfile::tempdir().unwrap();
        write_deals(
            dir.path(),
            &[
                ("D1".to_string(), "C1".to_string(), String::new()),
                ("D2".to_string(), "C2".to_string(), String::new()),
            ],
        );

        let transport = Arc::new(ScriptedTransport::new(|path, body| {
            if path.ends_with("/deals/search") {
                Ok(search_response(body, |v| v == "D1", |v| format!("hs-{}", v)))
            } else if path.ends_with("/search") {
                Ok(search_response(body, |_| true, |v| format!("hs-{}", v)))
            } else {
                Ok(echo_associations(body))
            }
        }));

        let result = run(dir.path(), transport.clone()).await;

        let company_search = &transport.calls_to("/companies/search")[0];
        assert_eq!(
            company_search.body["filterGroups"][0]["filters"][0]["values"],
            json!(["C1"])
        );
        let deals = stage(&result, "deals");
        assert_eq!((deals.succeeded, deals.residue), (1, 1));
        assert_eq!(stage(&result, "deal_companies").succeeded, 1);
        assert_eq!(result.residue_count, 1);
    }

    #[tokio::test]
    async fn test_partially_rejected_association_goes_to_residue() {
        let dir = tempfile::tempdir().unwrap();
        write_deals(
            dir.path(),
            &[
                ("D0".to_string(), "C0".to_string(), String::new()),
                ("D1".to_string(), "C1".to_string(), String::new()),
            ],
        );

        let transport = Arc::new(ScriptedTransport::new(|path, body| {
            if path.ends_with("/search") {
                Ok(search_response(body, |_| true, |v| format!("hs-{}", v)))
            } else {
                Ok(json!({
                    "status": "COMPLETE",
                    "results": [{"fromObjectId": "hs-D0", "toObjectId": "hs-C0", "labels": []}],
                    "errors": [{
                        "status": "error",
                        "message": "Could not find object hs-C1",
                        "context": {"toObjectId": ["hs-C1"]}
                    }]
                }))
            }
        }));

        let result = run(dir.path(), transport.clone()).await;

        let companies = stage(&result, "deal_companies");
        assert_eq!(
            (companies.attempted, companies.succeeded, companies.residue),
            (2, 1, 1)
        );
        assert_eq!(result.residue_count, 1);
        let residue = std::fs::read_to_string(result.residue_file.unwrap()).unwrap();
        assert!(residue.contains("\"D1\""));
        assert!(residue.contains("\"deal_companies\",\"write dropped\""));
        assert!(!residue.contains("\"D0\""));
    }
}
