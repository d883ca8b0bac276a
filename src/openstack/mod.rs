//! OpenStack Nova adapter for [`ComputeClient`].
//!
//! Only the five calls the readiness policies need are implemented. Server
//! calls are pinned to microversion 2.45 so `createImage` answers with the
//! image id in the body; image reads go through the legacy image proxy, which
//! Nova only serves at the base microversion.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

mod wire;

use crate::compute::{
    ComputeClient, ComputeError, ComputeFuture, EncryptedPassword, ImageOptions, ImageSnapshot,
    PasswordSnapshot, ServerSnapshot,
};
use crate::config::OpenStackConfig;

use wire::{
    CreateImageAction, CreateImageBody, CreateImageResponse, ImageEnvelope, PasswordBody,
    ServerEnvelope, fault_message, image_id_from_location,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SERVER_MICROVERSION: &str = "2.45";
const IMAGE_PROXY_MICROVERSION: &str = "2.1";
const MICROVERSION_HEADER: &str = "X-OpenStack-Nova-API-Version";
const REQUEST_ID_HEADER: &str = "X-OpenStack-Request-ID";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| build_http_client(HTTP_TIMEOUT));

/// Builds the shared client, falling back to reqwest defaults with a warning.
fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(
                error = %err,
                timeout_secs = timeout.as_secs(),
                "failed to build HTTP client with request timeout; using reqwest defaults without it"
            );
            reqwest::Client::new()
        })
}

/// Nova compute client authenticated with a pre-issued token.
#[derive(Clone)]
pub struct NovaClient {
    base_url: String,
    auth_token: String,
}

impl std::fmt::Debug for NovaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovaClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

struct Reply {
    status: StatusCode,
    location: Option<String>,
    body: Vec<u8>,
}

impl NovaClient {
    /// Creates a client for the compute endpoint at `compute_url`.
    #[must_use]
    pub fn new(compute_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: compute_url.into().trim_end_matches('/').to_owned(),
            auth_token: auth_token.into(),
        }
    }

    /// Creates a client from loaded configuration.
    #[must_use]
    pub fn from_config(config: &OpenStackConfig) -> Self {
        Self::new(config.compute_url.as_str(), config.auth_token.as_str())
    }

    /// Compute endpoint requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, microversion: &str) -> RequestBuilder {
        let request_id = format!("req-{}", Uuid::new_v4());
        tracing::debug!(%method, path, %request_id, "nova request");
        HTTP_CLIENT
            .request(method, format!("{}{path}", self.base_url))
            .header(AUTH_TOKEN_HEADER, &self.auth_token)
            .header(MICROVERSION_HEADER, microversion)
            .header(REQUEST_ID_HEADER, request_id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Reply, ComputeError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(transport)?.to_vec();
        Ok(Reply {
            status,
            location,
            body,
        })
    }

    /// Sends `request` and decodes a successful JSON body.
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: &str,
    ) -> Result<T, ComputeError> {
        let reply = self.send(request).await?;
        check_status(&reply, resource, id)?;
        decode(&reply.body)
    }
}

fn transport(err: reqwest::Error) -> ComputeError {
    ComputeError::Transport {
        message: err.to_string(),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ComputeError> {
    serde_json::from_slice(body).map_err(|err| ComputeError::Decode {
        message: err.to_string(),
    })
}

fn check_status(reply: &Reply, resource: &str, id: &str) -> Result<(), ComputeError> {
    if reply.status.is_success() {
        return Ok(());
    }
    if reply.status == StatusCode::NOT_FOUND {
        return Err(ComputeError::NotFound {
            resource: resource.to_owned(),
            id: id.to_owned(),
        });
    }
    Err(ComputeError::Http {
        status: reply.status.as_u16(),
        message: fault_message(&reply.body),
    })
}

impl ComputeClient for NovaClient {
    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ServerSnapshot> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("/servers/{server_id}"),
                SERVER_MICROVERSION,
            );
            let envelope: ServerEnvelope = self.fetch(request, "server", server_id).await?;
            Ok(envelope.server.into_snapshot())
        })
    }

    fn get_server_password<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ComputeFuture<'a, PasswordSnapshot> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("/servers/{server_id}/os-server-password"),
                SERVER_MICROVERSION,
            );
            let body: PasswordBody = self.fetch(request, "server", server_id).await?;
            Ok(PasswordSnapshot(body.password.map(EncryptedPassword::new)))
        })
    }

    fn get_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ImageSnapshot> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("/images/{image_id}"),
                IMAGE_PROXY_MICROVERSION,
            );
            let envelope: ImageEnvelope = self.fetch(request, "image", image_id).await?;
            Ok(envelope.image.into())
        })
    }

    fn create_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
        options: &'a ImageOptions,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut metadata = BTreeMap::new();
            if let Some(description) = options.description.as_deref() {
                metadata.insert("description", description);
            }
            let action = CreateImageAction {
                create_image: CreateImageBody { name, metadata },
            };
            let request = self
                .request(
                    Method::POST,
                    &format!("/servers/{server_id}/action"),
                    SERVER_MICROVERSION,
                )
                .json(&action);
            let reply = self.send(request).await?;
            check_status(&reply, "server", server_id)?;

            let parsed: CreateImageResponse = if reply.body.is_empty() {
                CreateImageResponse::default()
            } else {
                decode(&reply.body)?
            };
            parsed
                .image_id
                .or_else(|| reply.location.as_deref().and_then(image_id_from_location))
                .ok_or_else(|| ComputeError::Decode {
                    message: String::from("createImage response carried no image id"),
                })
        })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(
                Method::DELETE,
                &format!("/images/{image_id}"),
                IMAGE_PROXY_MICROVERSION,
            );
            let reply = self.send(request).await?;
            check_status(&reply, "image", image_id)
        })
    }
}
