//! JSON-over-HTTP provisioning client.
//!
//! Resources live under `/v1/resources/{kind}`:
//!
//! | call   | request                                  | success            |
//! |--------|------------------------------------------|--------------------|
//! | create | `POST /v1/resources/{kind}`              | `201` `Created`    |
//! | update | `PATCH /v1/resources/{kind}/{remote_id}` | `200` `{outputs}`  |
//! | delete | `DELETE /v1/resources/{kind}/{remote_id}`| `204`              |
//! | read   | `GET /v1/resources/{kind}/{remote_id}`   | `200` `{properties}` |

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use super::provisioner::Provisioner;
use super::types::{
    CreateRequest, Created, ErrorBody, Outputs, Properties, ReadResponse, UpdateRequest,
    UpdateResponse,
};
use crate::catalog::ResourceKind;
use crate::error::ProviderError;

/// Default `Retry-After` when a 429 carries none.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// HTTP provisioning client.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    client: Client,
    endpoint: Url,
    token: String,
    timeout_secs: u64,
}

impl HttpProvisioner {
    /// Creates a client for the API at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be built.
    pub fn new(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let endpoint = Url::parse(endpoint).map_err(|e| ProviderError::InvalidResponse {
            message: format!("Invalid provider endpoint '{endpoint}': {e}"),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(ProviderError::InvalidResponse {
                message: format!("Provider endpoint '{endpoint}' cannot be a base URL"),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token: token.to_string(),
            timeout_secs,
        })
    }

    fn url(&self, kind: ResourceKind, remote_id: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["v1", "resources", kind.as_str()]);
            if let Some(id) = remote_id {
                segments.push(id);
            }
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&self.token)
    }

    async fn send(
        &self,
        operation: &str,
        remote_id: Option<&str>,
        request: RequestBuilder,
    ) -> Result<Response, ProviderError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    operation: operation.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                ProviderError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        trace!(%status, operation, "Provider responded");

        if status.is_success() {
            return Ok(response);
        }

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationFailed {
                message: error_message(response).await,
            },
            StatusCode::NOT_FOUND if remote_id.is_some() => ProviderError::NotFound {
                remote_id: remote_id.unwrap_or_default().to_string(),
            },
            _ => ProviderError::api_error(status.as_u16(), error_message(response).await),
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
    }
}

/// Extracts `message` from a JSON error body, falling back to the raw text.
async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&body).map_or(body, |b| b.message)
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &Properties,
    ) -> Result<Created, ProviderError> {
        debug!(%kind, logical_id, "POST create");
        let request = self
            .request(Method::POST, self.url(kind, None))
            .json(&CreateRequest {
                logical_id,
                properties,
            });
        let response = self.send("create", None, request).await?;
        Self::json(response).await
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        changes: &Properties,
    ) -> Result<Outputs, ProviderError> {
        debug!(%kind, remote_id, "PATCH update");
        let request = self
            .request(Method::PATCH, self.url(kind, Some(remote_id)))
            .json(&UpdateRequest { changes });
        let response = self.send("update", Some(remote_id), request).await?;
        let body: UpdateResponse = Self::json(response).await?;
        Ok(body.outputs)
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<(), ProviderError> {
        debug!(%kind, remote_id, "DELETE");
        let request = self.request(Method::DELETE, self.url(kind, Some(remote_id)));
        self.send("delete", Some(remote_id), request).await?;
        Ok(())
    }

    async fn read(
        &self,
        kind: ResourceKind,
        remote_id: &str,
    ) -> Result<Option<Properties>, ProviderError> {
        let request = self.request(Method::GET, self.url(kind, Some(remote_id)));
        match self.send("read", Some(remote_id), request).await {
            Ok(response) => {
                let body: ReadResponse = Self::json(response).await?;
                Ok(Some(body.properties))
            }
            Err(ProviderError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
