use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use fieldsync_db::records::models::{FieldMap, FieldValue, LocalRecord};

use super::error::ReconcileError;
use super::normalize::normalize;
use super::resolver::{user_display_name, ReferenceResolver};
use super::schema::{ReferenceKind, APPOINTMENT, ORDER_NOTE, SALES_ORDER};
use super::LocalStore;
use crate::sp10::client::Sp10Client;
use crate::sp10::models::{field_id, field_text, nested, RemoteEntity};

/// Creates or updates local records from remote entities, one entity at a time.
pub struct UpsertReconciler<R> {
    store: Arc<R>,
    client: Sp10Client,
    resolver: ReferenceResolver<R>,
}

impl<R: LocalStore> UpsertReconciler<R> {
    pub fn new(store: Arc<R>, client: Sp10Client) -> Self {
        let resolver = ReferenceResolver::new(store.clone(), client.clone());
        Self {
            store,
            client,
            resolver,
        }
    }

    /// The record to write into: the unique active match, or a fresh one.
    ///
    /// A match that disappears between the lookup and the load is rebuilt from the
    /// remote entity under the same id. Any other load failure fails the entity and
    /// leaves the stored row untouched until the next cycle.
    pub async fn locate(
        &self,
        record_type: &'static str,
        external_id: &str,
    ) -> Result<LocalRecord, ReconcileError> {
        let matches = self
            .store
            .find_active_by_external_id(record_type, external_id)
            .await
            .map_err(|source| ReconcileError::Persistence {
                record_type,
                external_id: external_id.to_string(),
                source,
            })?;

        match matches.as_slice() {
            [] => Ok(LocalRecord::new(record_type).with_external_id(external_id)),
            [id] => match self.store.load(record_type, *id).await {
                Ok(record) => Ok(record),
                Err(source) if source.is_not_found() => {
                    tracing::warn!(
                        external_id,
                        %id,
                        error = %source,
                        "matched record vanished, rebuilding from remote"
                    );
                    let mut fresh = LocalRecord::new(record_type).with_external_id(external_id);
                    fresh.id = *id;
                    Ok(fresh)
                }
                Err(source) => Err(ReconcileError::RecordNotFoundOnLoad {
                    record_type,
                    id: *id,
                    source,
                }),
            },
            several => Err(ReconcileError::AmbiguousMatch {
                record_type,
                external_id: external_id.to_string(),
                count: several.len(),
            }),
        }
    }

    pub async fn upsert_appointment(&self, entity: &RemoteEntity) -> Result<Uuid, ReconcileError> {
        let external_id = field_id(entity, "Id")
            .ok_or_else(|| ReconcileError::InvalidEntity("appointment without Id".into()))?;
        let mut record = self.locate(APPOINTMENT.record_type, &external_id).await?;

        let sales_order = self.appointment_sales_order(entity).await;

        let status = nested(entity, "AppointmentStatus");
        let status = self
            .resolver
            .resolve_or_create(
                status.and_then(|s| field_id(s, "Id")).as_deref(),
                status.and_then(|s| field_text(s, "Value")).as_deref(),
                ReferenceKind::AppointmentStatus,
            )
            .await;

        let tech = nested(entity, "AssignedTech");
        let tech = self
            .resolver
            .resolve_or_create(
                tech.and_then(|t| field_id(t, "Id")).as_deref(),
                tech.and_then(|t| field_text(t, "ServiceTechName")).as_deref(),
                ReferenceKind::ServiceTech,
            )
            .await;

        record
            .set("sales_order", FieldValue::from_option(sales_order))
            .set("status", FieldValue::from_option(status))
            .set("assigned_tech", FieldValue::from_option(tech))
            .set("last_sync", Utc::now());
        apply_mapped(&mut record, normalize(entity, &APPOINTMENT));

        self.persist(&record, APPOINTMENT.record_type, &external_id)
            .await
    }

    pub async fn upsert_order_note(&self, entity: &RemoteEntity) -> Result<Uuid, ReconcileError> {
        let external_id = field_id(entity, "Id")
            .ok_or_else(|| ReconcileError::InvalidEntity("order note without Id".into()))?;
        let mut record = self.locate(ORDER_NOTE.record_type, &external_id).await?;

        let sales_order = self
            .local_order(nested(entity, "Order").and_then(|o| field_id(o, "ExternalId")))
            .await;

        let note_type = match nested(entity, "NoteType")
            .map(|t| (field_id(t, "Id"), field_text(t, "Value")))
        {
            Some((Some(id), Some(value))) => {
                self.resolver
                    .resolve_or_create(Some(id.as_str()), Some(value.as_str()), ReferenceKind::NoteType)
                    .await
            }
            _ => None,
        };

        let created_user = match nested(entity, "CreatedUser") {
            Some(user) => {
                let name = user_display_name(user);
                self.resolver
                    .resolve_or_create(
                        field_id(user, "Id").as_deref(),
                        name.as_deref(),
                        ReferenceKind::Sp10User,
                    )
                    .await
            }
            None => None,
        };

        record
            .set("last_sync", Utc::now())
            .set("sales_order", FieldValue::from_option(sales_order))
            .set("note_type", FieldValue::from_option(note_type))
            .set("created_user", FieldValue::from_option(created_user));
        apply_mapped(&mut record, normalize(entity, &ORDER_NOTE));

        self.persist(&record, ORDER_NOTE.record_type, &external_id)
            .await
    }

    /// Local order for an appointment: the SP10 order's `ExternalId`, kept only while
    /// that local order still exists.
    async fn appointment_sales_order(&self, entity: &RemoteEntity) -> Option<Uuid> {
        let order_id = field_id(entity, "OrderId")?;
        match self.client.order_external_id(&order_id).await {
            Ok(external) => self.local_order(external).await,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "order lookup failed");
                None
            }
        }
    }

    /// `Some` only when `external_id` names an existing local sales order.
    pub async fn local_order(&self, external_id: Option<String>) -> Option<Uuid> {
        let raw = external_id?;
        let Ok(id) = Uuid::parse_str(&raw) else {
            tracing::debug!(external_id = %raw, "order external id is not a local id");
            return None;
        };
        match self.store.exists(SALES_ORDER, id).await {
            Ok(true) => Some(id),
            Ok(false) => {
                tracing::debug!(%id, "referenced sales order no longer exists");
                None
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "sales order check failed");
                None
            }
        }
    }

    async fn persist(
        &self,
        record: &LocalRecord,
        record_type: &'static str,
        external_id: &str,
    ) -> Result<Uuid, ReconcileError> {
        self.store
            .save(record)
            .await
            .map_err(|source| ReconcileError::Persistence {
                record_type,
                external_id: external_id.to_string(),
                source,
            })
    }
}

/// Copy normalized values onto the record, leaving fields alone where the remote
/// value is null.
fn apply_mapped(record: &mut LocalRecord, fields: FieldMap) {
    for (name, value) in fields {
        if !value.is_null() {
            record.fields.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sp10::client::tests::{page, test_client};
    use fieldsync_db::in_memory::InMemoryStore;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entity(v: Value) -> RemoteEntity {
        serde_json::from_value(v).unwrap()
    }

    async fn setup() -> (MockServer, Arc<InMemoryStore>, UpsertReconciler<InMemoryStore>) {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let reconciler = UpsertReconciler::new(store.clone(), test_client(&server));
        (server, store, reconciler)
    }

    #[tokio::test]
    async fn top_level_status_is_ignored_in_favor_of_expanded_status() {
        let (_server, store, reconciler) = setup().await;

        let id = reconciler
            .upsert_appointment(&entity(json!({ "Id": 42, "Status": "Closed" })))
            .await
            .unwrap();

        let rows = store.records_of_type("appointment").await;
        assert_eq!(rows.len(), 1);
        let record = &rows[0];
        assert_eq!(record.id, id);
        assert_eq!(record.external_id.as_deref(), Some("42"));
        assert_eq!(record.get("sp10_id"), Some(&FieldValue::text("42")));
        assert!(record.get("sales_order").unwrap().is_null());
        assert!(record.get("status").unwrap().is_null());
        assert!(matches!(record.get("last_sync"), Some(FieldValue::Timestamp(_))));
        assert!(record.get("Status").is_none());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (_server, store, reconciler) = setup().await;
        let appt = entity(json!({
            "Id": 42,
            "AppointmentName": "PM visit",
            "ScheduledDateTime": "2021-04-01T15:00:00Z",
            "AppointmentStatus": { "Id": 3, "Value": "Scheduled" },
            "AssignedTech": { "Id": 8, "ServiceTechName": "Pat Lee" }
        }));

        let first = reconciler.upsert_appointment(&appt).await.unwrap();
        let before = store.get_record(first).await.unwrap();
        let second = reconciler.upsert_appointment(&appt).await.unwrap();
        let after = store.get_record(second).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.records_of_type("appointment").await.len(), 1);
        assert_eq!(store.records_of_type("appointment_status").await.len(), 1);
        assert_eq!(store.records_of_type("service_tech").await.len(), 1);

        let mut a = before.fields.clone();
        let mut b = after.fields.clone();
        a.remove("last_sync");
        b.remove("last_sync");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn null_remote_values_keep_local_values() {
        let (_server, store, reconciler) = setup().await;
        let id = reconciler
            .upsert_appointment(&entity(json!({ "Id": 1, "Notes": "bring ladder" })))
            .await
            .unwrap();
        reconciler
            .upsert_appointment(&entity(json!({ "Id": 1, "Notes": null })))
            .await
            .unwrap();

        let record = store.get_record(id).await.unwrap();
        assert_eq!(record.get("notes"), Some(&FieldValue::text("bring ladder")));
    }

    #[tokio::test]
    async fn ambiguous_match_is_skipped() {
        let (_server, store, reconciler) = setup().await;
        for _ in 0..2 {
            store
                .insert(LocalRecord::new("appointment").with_external_id("42"))
                .await;
        }

        let err = reconciler
            .upsert_appointment(&entity(json!({ "Id": 42 })))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::AmbiguousMatch { count: 2, .. }));
        assert_eq!(store.records_of_type("appointment").await.len(), 2);
    }

    #[tokio::test]
    async fn load_error_keeps_local_only_fields() {
        let (_server, store, reconciler) = setup().await;
        let event = Uuid::new_v4();
        let mut existing = LocalRecord::new("appointment").with_external_id("42");
        existing.set("linked_event", event).set("name", "Old");
        let existing_id = store.insert(existing).await;

        store.set_fail_loads(true);
        let err = reconciler
            .upsert_appointment(&entity(json!({ "Id": 42, "AppointmentName": "New" })))
            .await
            .unwrap_err();
        store.set_fail_loads(false);

        assert!(matches!(err, ReconcileError::RecordNotFoundOnLoad { id, .. } if id == existing_id));
        assert!(!err.is_skip());
        let after = store.get_record(existing_id).await.unwrap();
        assert_eq!(after.get("linked_event"), Some(&FieldValue::Reference(event)));
        assert_eq!(after.get("name"), Some(&FieldValue::text("Old")));

        // The next cycle, with the store healthy again, updates the same row.
        reconciler
            .upsert_appointment(&entity(json!({ "Id": 42, "AppointmentName": "New" })))
            .await
            .unwrap();
        let after = store.get_record(existing_id).await.unwrap();
        assert_eq!(after.get("linked_event"), Some(&FieldValue::Reference(event)));
        assert_eq!(after.get("name"), Some(&FieldValue::text("New")));
    }

    #[tokio::test]
    async fn vanished_match_is_rebuilt_under_same_id() {
        let (_server, store, reconciler) = setup().await;
        let mut existing = LocalRecord::new("appointment").with_external_id("42");
        existing.set("stale", "value");
        let existing_id = store.insert(existing).await;

        store.set_vanish_loads(true);
        let id = reconciler
            .upsert_appointment(&entity(json!({ "Id": 42, "AppointmentName": "New" })))
            .await
            .unwrap();
        store.set_vanish_loads(false);

        assert_eq!(id, existing_id);
        let rows = store.records_of_type("appointment").await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("stale").is_none());
        assert_eq!(rows[0].get("name"), Some(&FieldValue::text("New")));
    }

    #[tokio::test]
    async fn save_failure_is_persistence_error() {
        let (_server, store, reconciler) = setup().await;
        store.set_fail_saves(true);

        let err = reconciler
            .upsert_appointment(&entity(json!({ "Id": 42 })))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence { .. }));
        assert!(store.records_of_type("appointment").await.is_empty());
    }

    #[tokio::test]
    async fn missing_id_is_invalid() {
        let (_server, _store, reconciler) = setup().await;
        let err = reconciler
            .upsert_order_note(&entity(json!({ "Contents": "hello" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidEntity(_)));
    }

    #[tokio::test]
    async fn appointment_links_existing_sales_order() {
        let (server, store, reconciler) = setup().await;
        let order_id = store.insert(LocalRecord::new("sales_order")).await;

        Mock::given(method("GET"))
            .and(path("/Order"))
            .and(query_param("$filter", "Id eq 900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(json!([
                { "ExternalId": order_id.to_string() }
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Order"))
            .and(query_param("$filter", "Id eq 901"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(json!([
                { "ExternalId": Uuid::new_v4().to_string() }
            ]))))
            .mount(&server)
            .await;

        let linked = reconciler
            .upsert_appointment(&entity(json!({ "Id": 1, "OrderId": 900 })))
            .await
            .unwrap();
        let orphan = reconciler
            .upsert_appointment(&entity(json!({ "Id": 2, "OrderId": 901 })))
            .await
            .unwrap();

        let linked = store.get_record(linked).await.unwrap();
        assert_eq!(linked.get("sales_order"), Some(&FieldValue::Reference(order_id)));
        let orphan = store.get_record(orphan).await.unwrap();
        assert!(orphan.get("sales_order").unwrap().is_null());
    }

    #[tokio::test]
    async fn order_note_resolves_type_and_user() {
        let (_server, store, reconciler) = setup().await;
        let order_id = store.insert(LocalRecord::new("sales_order")).await;

        let note = entity(json!({
            "Id": 3376,
            "Contents": "Customer called",
            "CreatedDateTime": "2020-12-05T08:00:00Z",
            "AttachmentId": 77,
            "NoteType": { "Id": 4, "Value": "Phone" },
            "CreatedUser": { "Id": 12, "FirstName": "Dana", "LastName": "Reyes" },
            "Order": { "ExternalId": order_id.to_string() }
        }));
        let id = reconciler.upsert_order_note(&note).await.unwrap();

        let record = store.get_record(id).await.unwrap();
        assert_eq!(record.get("sales_order"), Some(&FieldValue::Reference(order_id)));
        assert_eq!(record.get("attachment_id"), Some(&FieldValue::text("77")));
        assert!(matches!(record.get("date_created"), Some(FieldValue::Timestamp(_))));
        assert!(record.get("note_type").unwrap().as_reference().is_some());

        let users = store.records_of_type("sp10_user").await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("name"), Some(&FieldValue::text("Dana Reyes")));
    }

    #[tokio::test]
    async fn note_type_needs_id_and_value() {
        let (_server, store, reconciler) = setup().await;
        let id = reconciler
            .upsert_order_note(&entity(json!({ "Id": 1, "NoteType": { "Id": 4 } })))
            .await
            .unwrap();
        let record = store.get_record(id).await.unwrap();
        assert!(record.get("note_type").unwrap().is_null());
        assert!(store.records_of_type("note_type").await.is_empty());
    }
}
