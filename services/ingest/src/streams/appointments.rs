use std::sync::Arc;

use async_trait::async_trait;

use fieldsync_db::watermark::repositories::WatermarkRepository;

use super::{StreamContext, APPOINTMENTS};
use crate::connector::{Connector, SyncResult};
use crate::sp10::models::{field_id, RemoteEntity};
use crate::sync::pool::{run_bounded, settle, ItemOutcome};
use crate::sync::reconciler::UpsertReconciler;
use crate::sync::LocalStore;

pub struct AppointmentsConnector<R, W> {
    ctx: StreamContext<W>,
    reconciler: UpsertReconciler<R>,
}

impl<R, W> AppointmentsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    pub fn new(store: Arc<R>, ctx: StreamContext<W>) -> Self {
        let reconciler = UpsertReconciler::new(store, ctx.client.clone());
        Self { ctx, reconciler }
    }

    async fn handle(&self, entity: RemoteEntity) -> ItemOutcome {
        let external_id = field_id(&entity, "Id");
        let result = self
            .reconciler
            .upsert_appointment(&entity)
            .await
            .map(|id| {
                tracing::debug!(%id, external_id = ?external_id, "appointment upserted");
                ItemOutcome::Written
            });
        settle(APPOINTMENTS.name, external_id.as_deref(), result)
    }
}

#[async_trait]
impl<R, W> Connector for AppointmentsConnector<R, W>
where
    R: LocalStore,
    W: WatermarkRepository,
{
    fn source_name(&self) -> &str {
        APPOINTMENTS.name
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        let concurrency = self.ctx.concurrency;
        self.ctx
            .run_cycle(&APPOINTMENTS, move |entities| {
                run_bounded(entities, concurrency, move |entity| self.handle(entity))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::tests::context;
    use fieldsync_db::in_memory::InMemoryStore;
    use fieldsync_db::records::models::FieldValue;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn pages_are_upserted_and_watermark_advances() {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());

        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .and(query_param("$expand", "AppointmentStatus,AssignedTech,Order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": {
                    "results": [
                        { "Id": 42, "AppointmentName": "PM", "AppointmentStatus": { "Id": 3, "Value": "Scheduled" } },
                        { "Id": 43, "AppointmentName": "Repair", "AppointmentStatus": { "Id": 3, "Value": "Scheduled" } }
                    ],
                    "__next": format!("{}/api/Appointment?$skiptoken=2", server.uri()),
                    "__clock": "/Date(2021-03-31-10-15-00)/"
                }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .and(query_param("$skiptoken", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": { "results": [{ "Id": 44 }], "__clock": "/Date(2030-01-01-00-00-00)/" }
            })))
            .mount(&server)
            .await;

        let connector = AppointmentsConnector::new(store.clone(), context(&server, &store));
        let result = connector.sync().await.unwrap();

        assert_eq!(result.upserted, 3);
        assert_eq!(result.errors, 0);
        assert_eq!(result.pages, 2);

        let rows = store.records_of_type("appointment").await;
        assert_eq!(rows.len(), 3);
        assert_eq!(store.records_of_type("appointment_status").await.len(), 1);

        let watermark = store.get("__clock").await.unwrap().unwrap();
        assert_eq!(watermark.to_rfc3339(), "2021-03-31T10:15:00+00:00");

        // A second cycle over the same data writes no new records.
        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": { "results": [{ "Id": 42, "AppointmentName": "PM" }] }
            })))
            .mount(&server)
            .await;
        let again = connector.sync().await.unwrap();
        assert_eq!(again.errors, 0);
        assert_eq!(again.upserted, 1);
        assert_eq!(store.records_of_type("appointment").await.len(), 3);
        let first = rows.iter().find(|r| r.external_id.as_deref() == Some("42")).unwrap();
        assert_eq!(first.get("name"), Some(&FieldValue::text("PM")));
    }

    #[tokio::test]
    async fn bad_entities_do_not_stop_the_cycle() {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());

        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": { "results": [{ "AppointmentName": "no id" }, { "Id": 7 }] }
            })))
            .mount(&server)
            .await;

        let connector = AppointmentsConnector::new(store.clone(), context(&server, &store));
        let result = connector.sync().await.unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.upserted, 1);
        assert_eq!(store.records_of_type("appointment").await.len(), 1);
    }
}
