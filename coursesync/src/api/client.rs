//! JSON-over-HTTP API client.
//!
//! Requests run on Tokio's blocking pool with a blocking reqwest client
//! built per call, so no client is ever dropped on an async worker.
//!
//! | Operation            | Request                              |
//! |----------------------|--------------------------------------|
//! | catalog              | `GET  {base}/sync/catalog`           |
//! | upload target        | `POST {base}/uploads/targets`        |
//! | start bulk job       | `POST {base}/bulk/{event}`           |
//! | job progress         | `GET  {base}/jobs/{id}`              |
//! | cancel job           | `POST {base}/jobs/{id}/cancel`       |
//! | refresh modules      | `GET  {base}/modules?ids=a,b`        |

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::BoxFuture;
use crate::bulk::{BulkAction, BulkApi, JobProgress, LocalStateRefresher};
use crate::store::{TransferItem, TransferTarget, UploadContext};
use crate::sync::{CatalogSource, SyncEntry};
use crate::transfer::{ResolvedTarget, TargetResolver};

/// Default request timeout.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_API_TIMEOUT,
            user_agent: format!("coursesync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Serialize)]
struct UploadTargetRequest<'a> {
    context: &'a UploadContext,
    folder_path: Option<&'a str>,
    name: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct UploadTargetResponse {
    upload_url: String,
    #[serde(default)]
    upload_params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    ids: &'a [String],
    skip_content_tags: bool,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    job_id: String,
}

/// Remote API over JSON.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    config: ApiConfig,
}

impl HttpApiClient {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn call<T, F>(&self, request: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client, &ApiConfig) -> ApiResult<T> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let client = Client::builder()
                .timeout(config.timeout)
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| ApiError::Network(format!("failed to create HTTP client: {}", e)))?;
            request(&client, &config)
        })
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))?
    }

    pub async fn fetch_catalog(&self) -> ApiResult<Vec<SyncEntry>> {
        self.call(|client, config| {
            let url = config.url("sync/catalog");
            debug!(url = %url, "Fetching sync catalog");
            json(client.get(url).send()?)
        })
        .await
    }

    pub async fn resolve_upload(&self, item: &TransferItem) -> ApiResult<ResolvedTarget> {
        let (context, folder_path) = match &item.target {
            TransferTarget::Upload {
                context,
                folder_path,
            } => (context.clone(), folder_path.clone()),
            TransferTarget::Download { .. } => {
                return Err(ApiError::InvalidRequest(format!(
                    "item {} is a download",
                    item.id
                )))
            }
        };
        let name = item
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ApiError::InvalidRequest(format!(
                    "{} has no file name",
                    item.local_path.display()
                ))
            })?;
        let size = item.bytes_total;

        let response: UploadTargetResponse = self
            .call(move |client, config| {
                let body = UploadTargetRequest {
                    context: &context,
                    folder_path: folder_path.as_deref(),
                    name,
                    size,
                };
                json(client.post(config.url("uploads/targets")).json(&body).send()?)
            })
            .await?;

        let params = response
            .upload_params
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Ok(ResolvedTarget {
            url: response.upload_url,
            params,
        })
    }

    pub async fn start_job(&self, ids: &[String], action: BulkAction) -> ApiResult<String> {
        let ids = ids.to_vec();
        self.call(move |client, config| {
            let body = BulkRequest {
                ids: &ids,
                skip_content_tags: action.skip_content_tags(),
            };
            let response = client
                .post(config.url(&format!("bulk/{}", action.event())))
                .json(&body)
                .send()?;
            if response.status().is_client_error() {
                return Err(ApiError::Rejected(error_message(response)));
            }
            json::<BulkResponse>(response).map(|body| body.job_id)
        })
        .await
    }

    pub async fn job_progress(&self, job_id: &str) -> ApiResult<JobProgress> {
        let job_id = job_id.to_string();
        self.call(move |client, config| {
            json(client.get(config.url(&format!("jobs/{}", job_id))).send()?)
        })
        .await
    }

    pub async fn cancel_job(&self, job_id: &str) -> ApiResult<()> {
        let job_id = job_id.to_string();
        self.call(move |client, config| {
            let response = client
                .post(config.url(&format!("jobs/{}/cancel", job_id)))
                .send()?;
            success(response).map(|_| ())
        })
        .await
    }

    pub async fn refresh_modules(&self, ids: &[String]) -> ApiResult<()> {
        let joined = ids.join(",");
        self.call(move |client, config| {
            let response = client
                .get(config.url("modules"))
                .query(&[("ids", joined.as_str())])
                .send()?;
            let modules: Vec<serde_json::Value> = json(response)?;
            debug!(modules = modules.len(), "Modules refreshed");
            Ok(())
        })
        .await
    }
}

fn error_message(response: Response) -> String {
    let status = response.status();
    match response.text() {
        Ok(text) if !text.is_empty() => text,
        _ => status.to_string(),
    }
}

fn success(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(response),
        })
    }
}

fn json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    success(response)?
        .json::<T>()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

impl CatalogSource for HttpApiClient {
    fn fetch_catalog(&self) -> BoxFuture<'_, ApiResult<Vec<SyncEntry>>> {
        Box::pin(HttpApiClient::fetch_catalog(self))
    }
}

impl TargetResolver for HttpApiClient {
    fn resolve_upload<'a>(
        &'a self,
        item: &'a TransferItem,
    ) -> BoxFuture<'a, ApiResult<ResolvedTarget>> {
        Box::pin(HttpApiClient::resolve_upload(self, item))
    }
}

impl BulkApi for HttpApiClient {
    fn start_job<'a>(
        &'a self,
        ids: &'a [String],
        action: BulkAction,
    ) -> BoxFuture<'a, ApiResult<String>> {
        Box::pin(HttpApiClient::start_job(self, ids, action))
    }

    fn job_progress<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ApiResult<JobProgress>> {
        Box::pin(HttpApiClient::job_progress(self, job_id))
    }

    fn cancel_job<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(HttpApiClient::cancel_job(self, job_id))
    }
}

impl LocalStateRefresher for HttpApiClient {
    fn refresh<'a>(
        &'a self,
        ids: &'a [String],
        _action: BulkAction,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.refresh_modules(ids))
    }
}
