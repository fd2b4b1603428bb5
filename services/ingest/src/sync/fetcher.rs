use chrono::{DateTime, Duration, Utc};

use fieldsync_config::StreamSettings;
use fieldsync_db::watermark::repositories::WatermarkRepository;

use super::error::ReconcileError;
use crate::sp10::client::{Sp10Client, Sp10ClientError};
use crate::sp10::models::RemoteEntity;
use crate::sp10::query::{build_change_url, format_watermark, parse_clock, rewrite_next};

/// One SP10 change feed.
#[derive(Debug, Clone, Copy)]
pub struct StreamDescriptor {
    /// Name used for logging and `SYNC_<NAME>_*` settings.
    pub name: &'static str,
    /// Watermark key.
    pub stream_key: &'static str,
    pub resource: &'static str,
    pub select: Option<&'static str>,
    pub expand: Option<&'static str>,
    pub filter_field: &'static str,
    pub default_max_pages: usize,
}

/// What one fetch cycle produced. Partial results are kept on failure.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub entities: Vec<RemoteEntity>,
    pub pages: usize,
    pub since: Option<DateTime<Utc>>,
    /// Watermark captured from the first page, as kept by the store.
    pub watermark: Option<DateTime<Utc>>,
    /// The page bound stopped the loop while more pages were available.
    pub truncated: bool,
    pub error: Option<ReconcileError>,
}

pub struct ChangeFetcher<'a, W> {
    client: &'a Sp10Client,
    watermarks: &'a W,
    lookback: Duration,
}

impl<'a, W> ChangeFetcher<'a, W>
where
    W: WatermarkRepository,
{
    pub fn new(client: &'a Sp10Client, watermarks: &'a W, lookback_hours: i64) -> Self {
        Self {
            client,
            watermarks,
            lookback: Duration::hours(lookback_hours),
        }
    }

    /// Starting point of a cycle: explicit override, then the stored watermark,
    /// then now minus the lookback.
    pub async fn resolve_since(
        &self,
        stream: &StreamDescriptor,
        override_value: Option<&str>,
    ) -> DateTime<Utc> {
        if let Some(raw) = override_value {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => return ts.with_timezone(&Utc),
                Err(e) => tracing::warn!(
                    stream = stream.name,
                    value = raw,
                    error = %e,
                    "ignoring unparseable watermark override"
                ),
            }
        }

        match self.watermarks.get(stream.stream_key).await {
            Ok(Some(ts)) => return ts,
            Ok(None) => {}
            Err(e) => tracing::warn!(
                stream = stream.name,
                error = %e,
                "watermark read failed, falling back to lookback"
            ),
        }

        Utc::now() - self.lookback
    }

    /// Page through the feed, concatenating results in page order.
    pub async fn fetch(&self, stream: &StreamDescriptor, settings: &StreamSettings) -> FetchOutcome {
        let since = self
            .resolve_since(stream, settings.watermark_override.as_deref())
            .await;
        tracing::info!(
            stream = stream.name,
            since = %format_watermark(since),
            max_pages = settings.max_pages,
            "fetching changes"
        );

        let mut outcome = FetchOutcome {
            since: Some(since),
            ..Default::default()
        };

        let base_url = &self.client.config().base_url;
        let first = build_change_url(
            base_url,
            stream.resource,
            stream.select,
            stream.expand,
            stream.filter_field,
            since,
        );
        let mut next = match first {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                outcome.error = Some(Sp10ClientError::InvalidUrl(e.to_string()).into());
                return outcome;
            }
        };

        while let Some(url) = next.take() {
            tracing::debug!(stream = stream.name, url = %url, page = outcome.pages, "requesting page");

            let page = match self.client.get_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(
                        stream = stream.name,
                        url = %url,
                        pages = outcome.pages,
                        error = %e,
                        "page request failed, keeping partial results"
                    );
                    outcome.error = Some(e.into());
                    break;
                }
            };

            // Later pages never move the watermark.
            if outcome.pages == 0 {
                if let Some(raw) = page.clock.as_deref() {
                    outcome.watermark = self.store_clock(stream, raw).await;
                }
            }

            next = page.next.as_deref().and_then(|n| rewrite_next(base_url, n));
            outcome.entities.extend(page.results);
            outcome.pages += 1;

            if next.is_some() && outcome.pages >= settings.max_pages {
                tracing::warn!(
                    stream = stream.name,
                    pages = outcome.pages,
                    "page limit reached, remaining changes wait for the next cycle"
                );
                outcome.truncated = true;
                break;
            }
        }

        tracing::info!(
            stream = stream.name,
            pages = outcome.pages,
            entities = outcome.entities.len(),
            truncated = outcome.truncated,
            "fetch finished"
        );
        outcome
    }

    async fn store_clock(&self, stream: &StreamDescriptor, raw: &str) -> Option<DateTime<Utc>> {
        let Some(clock) = parse_clock(raw) else {
            tracing::warn!(stream = stream.name, clock = raw, "unparseable __clock, watermark unchanged");
            return None;
        };

        match self.watermarks.put(stream.stream_key, clock).await {
            Ok(kept) => {
                tracing::debug!(stream = stream.name, watermark = %format_watermark(kept), "watermark stored");
                Some(kept)
            }
            Err(e) => {
                tracing::error!(stream = stream.name, error = %e, "failed to store watermark");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sp10::client::tests::test_client;
    use chrono::TimeZone;
    use fieldsync_db::in_memory::InMemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM: StreamDescriptor = StreamDescriptor {
        name: "appointments",
        stream_key: "__clock",
        resource: "Appointment",
        select: Some("*"),
        expand: Some("AppointmentStatus"),
        filter_field: "LastUpdatedDateTime",
        default_max_pages: 100,
    };

    fn settings(max_pages: usize, watermark_override: Option<&str>) -> StreamSettings {
        StreamSettings {
            max_pages,
            watermark_override: watermark_override.map(str::to_string),
        }
    }

    async fn mount_pages(server: &MockServer, count: usize) {
        for i in 1..=count {
            let next = if i < count {
                json!(format!("/api/Appointment?page={}", i + 1))
            } else {
                serde_json::Value::Null
            };
            let mut body = json!({
                "d": {
                    "results": [{ "Id": i * 10 }, { "Id": i * 10 + 1 }],
                    "__next": next,
                    "__clock": format!("/Date(2021-03-31-10-{:02}-00)/", i)
                }
            });
            if i == 1 {
                Mock::given(method("GET"))
                    .and(path("/Appointment"))
                    .and(query_param("$select", "*"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(body.take()))
                    .mount(server)
                    .await;
            } else {
                Mock::given(method("GET"))
                    .and(path("/Appointment"))
                    .and(query_param("page", i.to_string()))
                    .respond_with(ResponseTemplate::new(200).set_body_json(body.take()))
                    .mount(server)
                    .await;
            }
        }
    }

    fn ids(outcome: &FetchOutcome) -> Vec<i64> {
        outcome
            .entities
            .iter()
            .map(|e| e["Id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn concatenates_pages_in_order() {
        let server = MockServer::start().await;
        mount_pages(&server, 3).await;

        let client = test_client(&server);
        let store = InMemoryStore::new();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        let outcome = fetcher.fetch(&STREAM, &settings(100, None)).await;
        assert_eq!(ids(&outcome), vec![10, 11, 20, 21, 30, 31]);
        assert_eq!(outcome.pages, 3);
        assert!(!outcome.truncated);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn watermark_comes_from_first_page_only() {
        let server = MockServer::start().await;
        mount_pages(&server, 3).await;

        let client = test_client(&server);
        let store = InMemoryStore::new();
        let fetcher = ChangeFetcher::new(&client, &store, 24);
        fetcher.fetch(&STREAM, &settings(100, None)).await;

        let stored = store.get("__clock").await.unwrap().unwrap();
        assert_eq!(stored, Utc.with_ymd_and_hms(2021, 3, 31, 10, 1, 0).unwrap());
    }

    #[tokio::test]
    async fn stops_at_max_pages() {
        let server = MockServer::start().await;
        mount_pages(&server, 3).await;

        let client = test_client(&server);
        let store = InMemoryStore::new();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        let outcome = fetcher.fetch(&STREAM, &settings(2, None)).await;
        assert_eq!(ids(&outcome), vec![10, 11, 20, 21]);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn failure_keeps_partial_results() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .and(query_param("$select", "*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": { "results": [{ "Id": 1 }], "__next": "/api/Appointment?page=2" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let store = InMemoryStore::new();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        let outcome = fetcher.fetch(&STREAM, &settings(100, None)).await;
        assert_eq!(ids(&outcome), vec![1]);
        assert!(matches!(outcome.error, Some(ReconcileError::TransientFetch(_))));
        assert!(store.get("__clock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn absent_watermark_uses_lookback() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let store = InMemoryStore::new();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        let before = Utc::now() - Duration::hours(24);
        let since = fetcher.resolve_since(&STREAM, None).await;
        let after = Utc::now() - Duration::hours(24);
        assert!(since >= before && since <= after);
    }

    #[tokio::test]
    async fn override_beats_stored_watermark() {
        let server = MockServer::start().await;
        let client = test_client(&server);
        let store = InMemoryStore::new();
        let stored = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        store.put("__clock", stored).await.unwrap();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        assert_eq!(fetcher.resolve_since(&STREAM, None).await, stored);
        assert_eq!(
            fetcher
                .resolve_since(&STREAM, Some("2020-06-01T00:00:00.000Z"))
                .await,
            Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
        );
        // garbage override falls through to the store
        assert_eq!(fetcher.resolve_since(&STREAM, Some("yesterday")).await, stored);
    }

    #[tokio::test]
    async fn filter_uses_resolved_watermark() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/Appointment"))
            .and(query_param(
                "$filter",
                "LastUpdatedDateTime ge 2021-03-31T10:15:00.000Z",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "d": { "results": [] } })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let store = InMemoryStore::new();
        store
            .put("__clock", Utc.with_ymd_and_hms(2021, 3, 31, 10, 15, 0).unwrap())
            .await
            .unwrap();
        let fetcher = ChangeFetcher::new(&client, &store, 24);

        let outcome = fetcher.fetch(&STREAM, &settings(100, None)).await;
        assert_eq!(outcome.pages, 1);
        assert!(outcome.entities.is_empty());
    }
}
