use std::time::Duration;

use base64::prelude::*;
use reqwest::header::{HeaderName, ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use fieldsync_common::error::FieldsyncResult;
use fieldsync_config::env::{get_opt_var, parse_var_or};

use super::models::{
    field_id, field_text, AttachmentDownload, Envelope, NoteUpload, ODataPage, RemoteEntity,
};
use super::query::resource_url;

#[derive(Debug, Clone)]
pub struct Sp10ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    /// Ingestion endpoint for file notes; uploads are unavailable without it.
    pub upload_url: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Sp10ClientConfig {
    /// Load SP10 config from environment.
    ///
    /// Returns `Ok(None)` if SP10 is not configured (base URL / API key / secret missing).
    /// Returns `Err` if a numeric setting is present but unparseable.
    pub fn from_env() -> FieldsyncResult<Option<Self>> {
        let base_url = match get_opt_var("SP10_BASE_URL") {
            Some(v) => v,
            None => return Ok(None),
        };
        let api_key = match get_opt_var("SP10_API_KEY") {
            Some(v) => v,
            None => return Ok(None),
        };
        let secret_key = match get_opt_var("SP10_SECRET_KEY") {
            Some(v) => v,
            None => return Ok(None),
        };

        Ok(Some(Self {
            base_url,
            api_key,
            secret_key,
            upload_url: get_opt_var("SP10_UPLOAD_URL"),
            max_retries: parse_var_or("SP10_MAX_RETRIES", 0)?,
            timeout_secs: parse_var_or("SP10_TIMEOUT_SECS", 30)?,
        }))
    }
}

#[derive(Clone)]
pub struct Sp10Client {
    client: Client,
    config: Sp10ClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum Sp10ClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl Sp10Client {
    pub fn new(config: Sp10ClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &Sp10ClientConfig {
        &self.config
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn authed_get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("APIKey", &self.config.api_key)
            .header("SK", &self.config.secret_key)
            .header(ACCEPT, "application/json")
    }

    /// Fetch one page of a feed. `url` must already be absolute.
    pub async fn get_page(&self, url: &str) -> Result<ODataPage, Sp10ClientError> {
        let response = self.send_with_retry(|| self.authed_get(url)).await?;
        let bytes = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.d)
    }

    /// `GET <base>/<resource>?<params>` and return the result rows.
    pub async fn query(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<RemoteEntity>, Sp10ClientError> {
        let mut url = resource_url(&self.config.base_url, resource)
            .map_err(|e| Sp10ClientError::InvalidUrl(format!("{resource}: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(self.get_page(url.as_str()).await?.results)
    }

    pub async fn first_result(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<RemoteEntity>, Sp10ClientError> {
        Ok(self.query(resource, params).await?.into_iter().next())
    }

    /// Display value of a user-defined list entry.
    pub async fn list_value_name(&self, id: &str) -> Result<Option<String>, Sp10ClientError> {
        let filter = format!("Id eq {id}");
        let row = self
            .first_result("UserDefinedListValue", &[("$filter", filter.as_str())])
            .await?;
        Ok(row.and_then(|r| field_text(&r, "Value")))
    }

    /// The local order id SP10 keeps for one of its orders.
    pub async fn order_external_id(
        &self,
        order_id: &str,
    ) -> Result<Option<String>, Sp10ClientError> {
        let filter = format!("Id eq {order_id}");
        let row = self
            .first_result("Order", &[("$filter", filter.as_str()), ("$select", "ExternalId")])
            .await?;
        Ok(row.and_then(|r| field_id(&r, "ExternalId")))
    }

    /// The SP10 order id for a local order id.
    pub async fn order_id_for_external(
        &self,
        external_id: &str,
    ) -> Result<Option<String>, Sp10ClientError> {
        let filter = format!("ExternalId eq {external_id}");
        let row = self
            .first_result("Order", &[("$filter", filter.as_str()), ("$select", "Id")])
            .await?;
        Ok(row.and_then(|r| field_id(&r, "Id")))
    }

    /// Contract and renewal numbers for a contract visit.
    pub async fn contract_for_visit(
        &self,
        visit_id: &str,
    ) -> Result<Option<RemoteEntity>, Sp10ClientError> {
        let filter = format!("ContractSchedule/ContractVisit/Id eq {visit_id}");
        self.first_result(
            "Contract/All",
            &[
                ("$filter", filter.as_str()),
                ("$select", "ContractNumber,RenewalNumber"),
            ],
        )
        .await
    }

    pub async fn download_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<AttachmentDownload, Sp10ClientError> {
        let mut url = resource_url(&self.config.base_url, "Attachment/GetAttachment")
            .map_err(|e| Sp10ClientError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("id", attachment_id);

        let response = self
            .send_with_retry(|| {
                self.client
                    .get(url.as_str())
                    .header("APIKey", &self.config.api_key)
                    .header("SK", &self.config.secret_key)
            })
            .await?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);
        let bytes = response.bytes().await?.to_vec();

        Ok(AttachmentDownload {
            content_type,
            content_disposition,
            bytes,
        })
    }

    /// Push a file note to an SP10 order through the ingestion endpoint.
    /// The file travels base64-encoded; the first created row is returned.
    pub async fn upload_file_note(
        &self,
        order_id: &str,
        note: &NoteUpload,
    ) -> Result<Option<RemoteEntity>, Sp10ClientError> {
        let upload_url = self
            .config
            .upload_url
            .as_deref()
            .ok_or_else(|| Sp10ClientError::InvalidUrl("SP10_UPLOAD_URL is not set".into()))?;

        let payload = serde_json::json!({
            "APIKey": self.config.api_key,
            "SK": self.config.secret_key,
            "orderId": order_id,
            "fileName": note.file_name,
            "Description": note.description,
            "Content-Type": note.content_type,
            "fileJson": BASE64_STANDARD.encode(&note.contents),
        });

        tracing::debug!(order_id, file_name = %note.file_name, "uploading file note");

        let response = self
            .send_with_retry(|| self.client.post(upload_url).json(&payload))
            .await?;
        let bytes = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.d.results.into_iter().next())
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, Sp10ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match build().send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(Sp10ClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Sp10ClientError::HttpError { status, body });
        }

        Err(Sp10ClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
