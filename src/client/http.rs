//! HTTP backend client
//!
//! Thin reqwest wrapper over the routing backend's REST surface. Maps
//! transport and decode failures to `BackendUnreachable` and non-2xx
//! answers to `BackendRejected`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;
use windroute_types::{
    ActivateRequest, ActivateResponse, DeactivateRequest, PolicyResponse, PolicyStepDto, RouteDto,
    ZoneDto, ZoneRef,
};

use super::ControlBackend;
use crate::error::{Result, RouteError};

/// Longest response body kept in a `BackendRejected` error
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized).map_err(|e| {
            RouteError::InvalidState(format!("invalid backend url {base_url:?}: {e}"))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::BackendUnreachable(format!("failed to build client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RouteError::InvalidState(format!("invalid request path {path:?}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        decode(check_status(response).await?).await
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path)?;
        tracing::debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await
    }
}

fn transport_error(e: reqwest::Error) -> RouteError {
    RouteError::BackendUnreachable(e.to_string())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(RouteError::BackendRejected {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&text).map_err(|e| {
        RouteError::BackendUnreachable(format!(
            "malformed response at line {} col {}: {}",
            e.line(),
            e.column(),
            e
        ))
    })
}

#[async_trait]
impl ControlBackend for HttpBackend {
    async fn list_zones(&self) -> Result<Vec<ZoneDto>> {
        self.get_json("api/zones/").await
    }

    async fn list_routes(&self) -> Result<Vec<RouteDto>> {
        self.get_json("api/routes/").await
    }

    async fn route_policy(&self, route_id: i64) -> Result<Vec<PolicyStepDto>> {
        let response: PolicyResponse = self
            .get_json(&format!("api/routes/{route_id}/policy"))
            .await?;
        Ok(response.into_steps())
    }

    async fn activate(&self, zone: &ZoneRef, wind: &str) -> Result<ActivateResponse> {
        let body = ActivateRequest {
            zone_id: zone.clone(),
            wind_direction: wind.to_string(),
        };
        let response = self.post_json("api/activate/", &body).await?;
        let text = response.text().await.map_err(transport_error)?;
        // Some backends answer activation with an empty 2xx body.
        if text.trim().is_empty() {
            return Ok(ActivateResponse::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| RouteError::BackendUnreachable(format!("malformed activation response: {e}")))
    }

    async fn deactivate(&self, zone: &ZoneRef) -> Result<()> {
        let body = DeactivateRequest {
            zone_id: zone.clone(),
        };
        self.post_json("api/deactivate/", &body).await?;
        Ok(())
    }

    async fn zone_status(&self, zone: &ZoneRef) -> Result<Value> {
        self.get_json(&format!("api/zones/{}/status", zone.as_path_segment()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:8000", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url().as_str(), "http://localhost:8000/");
        assert_eq!(
            backend.url("api/zones/").unwrap().as_str(),
            "http://localhost:8000/api/zones/"
        );
    }

    #[test]
    fn base_url_keeps_prefix_path() {
        let backend =
            HttpBackend::new("http://ops.local/console/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend.url("api/routes/3/policy").unwrap().as_str(),
            "http://ops.local/console/api/routes/3/policy"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpBackend::new("not a url", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, RouteError::InvalidState(_)));
    }
}
