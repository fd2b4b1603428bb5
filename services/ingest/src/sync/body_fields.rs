use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use fieldsync_db::records::models::{FieldMap, FieldValue};

use super::error::ReconcileError;
use super::normalize::{normalize, parse_remote_date};
use super::resolver::{user_display_name, ReferenceResolver};
use super::schema::{ReferenceKind, ORDER_BODY, SALES_ORDER};
use super::LocalStore;
use crate::sp10::client::Sp10Client;
use crate::sp10::models::{field_id, field_text, nested, RemoteEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    /// Number of fields submitted.
    Updated(usize),
    Unchanged,
    Skipped(&'static str),
}

/// Pushes SP10 order body fields onto the matching local sales order.
pub struct BodyFieldsSync<R> {
    store: Arc<R>,
    client: Sp10Client,
    resolver: ReferenceResolver<R>,
}

impl<R: LocalStore> BodyFieldsSync<R> {
    pub fn new(store: Arc<R>, client: Sp10Client) -> Self {
        let resolver = ReferenceResolver::new(store.clone(), client.clone());
        Self {
            store,
            client,
            resolver,
        }
    }

    pub async fn sync_order(&self, order: &RemoteEntity) -> Result<BodyOutcome, ReconcileError> {
        let Some(external_id) = field_id(order, "ExternalId") else {
            return Ok(BodyOutcome::Skipped("order has no ExternalId"));
        };
        let persistence = |source| ReconcileError::Persistence {
            record_type: SALES_ORDER,
            external_id: external_id.clone(),
            source,
        };

        let Ok(id) = Uuid::parse_str(&external_id) else {
            return Ok(BodyOutcome::Skipped("ExternalId is not a local order id"));
        };
        if !self.store.exists(SALES_ORDER, id).await.map_err(persistence)? {
            return Ok(BodyOutcome::Skipped("local order not found"));
        }

        let mut candidate = normalize(order, &ORDER_BODY);
        if candidate.is_empty() {
            return Ok(BodyOutcome::Skipped("no body fields"));
        }

        let contract = self.contract_number(field_id(order, "ContractVisitId")).await;
        let assigned_to = self.assigned_to(order).await;
        let order_status = self.order_status(order).await;
        candidate.insert("contract_number".into(), FieldValue::from_option(contract));
        candidate.insert("assigned_to".into(), FieldValue::from_option(assigned_to));
        candidate.insert("order_status".into(), FieldValue::from_option(order_status));

        let names: Vec<String> = candidate.keys().cloned().collect();
        let current = self
            .store
            .lookup_fields(SALES_ORDER, id, &names)
            .await
            .map_err(persistence)?;

        let changed = diff_fields(&current, candidate);
        if changed.is_empty() {
            tracing::debug!(%id, "body fields unchanged");
            return Ok(BodyOutcome::Unchanged);
        }

        tracing::debug!(%id, fields = ?changed.keys().collect::<Vec<_>>(), "submitting body fields");
        self.store
            .submit_fields(SALES_ORDER, id, &changed)
            .await
            .map_err(persistence)?;
        Ok(BodyOutcome::Updated(changed.len()))
    }

    /// `ContractNumber-RenewalNumber` for the visit; renewal defaults to `1`.
    async fn contract_number(&self, visit_id: Option<String>) -> Option<String> {
        let visit_id = visit_id?;
        let contract = match self.client.contract_for_visit(&visit_id).await {
            Ok(contract) => contract?,
            Err(e) => {
                tracing::error!(visit_id = %visit_id, error = %e, "contract lookup failed");
                return None;
            }
        };
        let number = field_text(&contract, "ContractNumber")?;
        let renewal = field_text(&contract, "RenewalNumber").unwrap_or_else(|| "1".to_string());
        Some(format!("{number}-{renewal}"))
    }

    async fn assigned_to(&self, order: &RemoteEntity) -> Option<Uuid> {
        let user = nested(order, "AssignedTo")?;
        let name = user_display_name(user);
        self.resolver
            .resolve_or_create(
                field_id(user, "Id").as_deref(),
                name.as_deref(),
                ReferenceKind::Sp10User,
            )
            .await
    }

    /// Named by `CodeNumber`, not `Value`, to match what SP10 shows users.
    async fn order_status(&self, order: &RemoteEntity) -> Option<Uuid> {
        let status = nested(order, "OrderStatus")?;
        let id = field_id(status, "Id")?;
        let code = field_text(status, "CodeNumber")?;
        self.resolver
            .resolve_or_create(Some(id.as_str()), Some(code.as_str()), ReferenceKind::OrderStatus)
            .await
    }
}

/// Fields of `candidate` whose canonical value differs from `current`.
pub fn diff_fields(current: &FieldMap, candidate: FieldMap) -> FieldMap {
    candidate
        .into_iter()
        .filter_map(|(name, value)| {
            let existing = current
                .get(&name)
                .map(canonical)
                .unwrap_or(FieldValue::Null);
            let mut value = canonical(&value);
            if matches!(existing, FieldValue::Bool(_)) {
                value = FieldValue::Bool(truthy(&value));
            }
            (!same_value(&existing, &value)).then_some((name, value))
        })
        .collect()
}

/// Multi-references count only when they hold exactly one id.
fn canonical(value: &FieldValue) -> FieldValue {
    match value {
        FieldValue::References(_) => FieldValue::from_option(value.as_reference()),
        other => other.clone(),
    }
}

fn truthy(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::Bool(b) => *b,
        FieldValue::Number(n) => *n != 0.0 && !n.is_nan(),
        FieldValue::Text(s) => !s.is_empty(),
        FieldValue::References(ids) => !ids.is_empty(),
        FieldValue::Timestamp(_) | FieldValue::Reference(_) => true,
    }
}

fn same_value(current: &FieldValue, candidate: &FieldValue) -> bool {
    match (current, candidate) {
        (FieldValue::Text(s), FieldValue::Timestamp(t))
        | (FieldValue::Timestamp(t), FieldValue::Text(s)) => parse_instant(s) == Some(*t),
        (FieldValue::Text(s), FieldValue::Number(n))
        | (FieldValue::Number(n), FieldValue::Text(s)) => s.trim().parse::<f64>().ok() == Some(*n),
        (a, b) => a == b,
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    parse_remote_date(s).or_else(|| {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sp10::client::tests::{page, test_client};
    use chrono::TimeZone;
    use fieldsync_db::in_memory::InMemoryStore;
    use fieldsync_db::records::models::LocalRecord;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entity(v: Value) -> RemoteEntity {
        serde_json::from_value(v).unwrap()
    }

    fn map(pairs: Vec<(&str, FieldValue)>) -> FieldMap {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn diff_writes_only_changed_fields() {
        let current = map(vec![
            ("follow_up_note", FieldValue::text("call back")),
            ("tech_order_status", FieldValue::text("Open")),
        ]);
        let candidate = map(vec![
            ("follow_up_note", FieldValue::text("call back")),
            ("tech_order_status", FieldValue::text("Closed")),
        ]);
        let diff = diff_fields(&current, candidate);
        assert_eq!(diff, map(vec![("tech_order_status", FieldValue::text("Closed"))]));
    }

    #[test]
    fn boolean_fields_compare_strictly() {
        let current = map(vec![
            ("follow_up_alert", FieldValue::Bool(false)),
            ("show_actual_hours", FieldValue::Bool(true)),
            ("report_sent_to_client", FieldValue::Bool(false)),
        ]);
        let candidate = map(vec![
            ("follow_up_alert", FieldValue::Null),
            ("show_actual_hours", FieldValue::text("yes")),
            ("report_sent_to_client", FieldValue::Bool(true)),
        ]);
        let diff = diff_fields(&current, candidate);
        assert_eq!(
            diff,
            map(vec![("report_sent_to_client", FieldValue::Bool(true))])
        );
    }

    #[test]
    fn dates_compare_by_instant() {
        let t = Utc.with_ymd_and_hms(2021, 4, 1, 0, 0, 0).unwrap();
        let current = map(vec![
            ("cancel_date", FieldValue::text("2021-04-01T00:00:00.000+00:00")),
            ("other_date", FieldValue::Timestamp(t)),
        ]);
        let candidate = map(vec![
            ("cancel_date", FieldValue::Timestamp(t)),
            ("other_date", FieldValue::Timestamp(t + chrono::Duration::seconds(1))),
        ]);
        let diff = diff_fields(&current, candidate);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("other_date"));
    }

    #[test]
    fn multi_references_unwrap_single_value() {
        let id = Uuid::new_v4();
        let current = map(vec![
            ("assigned_to", FieldValue::References(vec![id])),
            ("order_status", FieldValue::References(vec![id, Uuid::new_v4()])),
        ]);
        let candidate = map(vec![
            ("assigned_to", FieldValue::Reference(id)),
            ("order_status", FieldValue::Null),
        ]);
        assert!(diff_fields(&current, candidate).is_empty());
    }

    #[test]
    fn missing_current_values_count_as_null() {
        let candidate = map(vec![
            ("contract_number", FieldValue::Null),
            ("follow_up_note", FieldValue::text("x")),
        ]);
        let diff = diff_fields(&FieldMap::new(), candidate);
        assert_eq!(diff, map(vec![("follow_up_note", FieldValue::text("x"))]));
    }

    async fn setup() -> (MockServer, Arc<InMemoryStore>, BodyFieldsSync<InMemoryStore>) {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let sync = BodyFieldsSync::new(store.clone(), test_client(&server));
        (server, store, sync)
    }

    #[tokio::test]
    async fn second_sync_submits_nothing() {
        let (server, store, sync) = setup().await;
        let mut local = LocalRecord::new("sales_order");
        local.set("follow_up_alert", false);
        let id = store.insert(local).await;

        Mock::given(method("GET"))
            .and(path("/Contract/All"))
            .and(query_param("$filter", "ContractSchedule/ContractVisit/Id eq 31"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(json!([
                { "ContractNumber": "C-100" }
            ]))))
            .mount(&server)
            .await;

        let order = entity(json!({
            "Id": 5,
            "ExternalId": id.to_string(),
            "ContractVisitId": 31,
            "UDF_Follow_Up_Required": "True",
            "UDF_Follow_Up_Note": null,
            "TechOrderStatus": "Dispatched",
            "AssignedTo": { "Id": 12, "EmployeeNumber": "E-12" },
            "OrderStatus": { "Id": 2, "CodeNumber": "OPEN", "Value": "Open" }
        }));

        let first = sync.sync_order(&order).await.unwrap();
        assert_eq!(first, BodyOutcome::Updated(5));

        let stored = store.get_record(id).await.unwrap();
        assert_eq!(stored.get("follow_up_alert"), Some(&FieldValue::Bool(true)));
        assert_eq!(stored.get("contract_number"), Some(&FieldValue::text("C-100-1")));
        assert_eq!(stored.get("tech_order_status"), Some(&FieldValue::text("Dispatched")));
        assert!(stored.get("assigned_to").unwrap().as_reference().is_some());
        let statuses = store.records_of_type("order_status").await;
        assert_eq!(statuses[0].get("name"), Some(&FieldValue::text("OPEN")));

        let second = sync.sync_order(&order).await.unwrap();
        assert_eq!(second, BodyOutcome::Unchanged);
        assert_eq!(store.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn orders_without_local_match_are_skipped() {
        let (_server, store, sync) = setup().await;

        let cases = [
            json!({ "Id": 1, "TechOrderStatus": "Open" }),
            json!({ "Id": 2, "ExternalId": "18842", "TechOrderStatus": "Open" }),
            json!({ "Id": 3, "ExternalId": Uuid::new_v4().to_string(), "TechOrderStatus": "Open" }),
        ];
        for case in cases {
            let outcome = sync.sync_order(&entity(case)).await.unwrap();
            assert!(matches!(outcome, BodyOutcome::Skipped(_)), "{outcome:?}");
        }
        assert!(store.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn order_without_body_fields_is_skipped() {
        let (_server, store, sync) = setup().await;
        let id = store.insert(LocalRecord::new("sales_order")).await;

        let outcome = sync
            .sync_order(&entity(json!({ "Id": 1, "ExternalId": id.to_string() })))
            .await
            .unwrap();
        assert_eq!(outcome, BodyOutcome::Skipped("no body fields"));
    }

    #[tokio::test]
    async fn contract_lookup_failure_leaves_number_empty() {
        let (server, store, sync) = setup().await;
        let id = store.insert(LocalRecord::new("sales_order")).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = sync
            .sync_order(&entity(json!({
                "ExternalId": id.to_string(),
                "ContractVisitId": 31,
                "UDF_Follow_Up_Note": "ring first"
            })))
            .await
            .unwrap();
        assert_eq!(outcome, BodyOutcome::Updated(1));
        let stored = store.get_record(id).await.unwrap();
        assert!(stored.get("contract_number").unwrap().is_null());
    }
}
