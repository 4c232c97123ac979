//! RouterOS REST executor
//!
//! Talks to `/rest/ppp/secret` and `/rest/ppp/active` over HTTPS with basic auth.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netbill_core::tenant::RouterConnection;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{DeviceError, Result};
use crate::executor::{ActiveSession, DeviceExecutor, DeviceSecret, SecretUpdate};
use crate::registry::DeviceConnector;

/// Executor backed by a RouterOS REST endpoint
pub struct RestDevice {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl RestDevice {
    pub fn new(client: Client, router: &RouterConnection) -> Self {
        Self {
            client,
            base_url: router.base_url.trim_end_matches('/').to_string(),
            username: router.username.clone(),
            password: router.password.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/rest/{}", self.base_url, path);
        trace!("{} {}", method, url);
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, command: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|err| {
            DeviceError::connection_with_source(format!("{} request failed", command), err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeviceError::command(
                command,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, command: &'static str, request: RequestBuilder) -> Result<T> {
        let response = self.send(command, request).await?;
        response.json::<T>().await.map_err(|err| DeviceError::ParseError {
            message: format!("{}: {}", command, err),
        })
    }
}

#[async_trait]
impl DeviceExecutor for RestDevice {
    async fn list_secrets(&self) -> Result<Vec<DeviceSecret>> {
        self.fetch("list_secrets", self.request(Method::GET, "ppp/secret"))
            .await
    }

    async fn find_secret(&self, name: &str) -> Result<Option<DeviceSecret>> {
        let secrets: Vec<DeviceSecret> = self
            .fetch(
                "find_secret",
                self.request(Method::GET, "ppp/secret")
                    .query(&[("name", name)]),
            )
            .await?;
        Ok(secrets.into_iter().find(|secret| secret.name == name))
    }

    async fn set_secret_fields(&self, id: &str, update: &SecretUpdate) -> Result<()> {
        let path = format!("ppp/secret/{}", urlencoding::encode(id));
        debug!("Updating secret {} on {}", id, self.base_url);
        self.send(
            "set_secret_fields",
            self.request(Method::PATCH, &path).json(update),
        )
        .await?;
        Ok(())
    }

    async fn list_active_sessions(&self, name_filter: Option<&str>) -> Result<Vec<ActiveSession>> {
        let mut request = self.request(Method::GET, "ppp/active");
        if let Some(name) = name_filter {
            request = request.query(&[("name", name)]);
        }
        self.fetch("list_active_sessions", request).await
    }

    async fn remove_active_session(&self, id: &str) -> Result<()> {
        let path = format!("ppp/active/{}", urlencoding::encode(id));
        self.send(
            "remove_active_session",
            self.request(Method::DELETE, &path),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.send("ping", self.request(Method::GET, "system/identity"))
            .await?;
        Ok(())
    }
}

/// Opens `RestDevice` executors sharing one HTTP client
pub struct RestConnector {
    client: Client,
}

impl RestConnector {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| DeviceError::connection_with_source("Failed to build HTTP client", err))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeviceConnector for RestConnector {
    async fn connect(&self, router: &RouterConnection) -> Result<Arc<dyn DeviceExecutor>> {
        if router.base_url.trim().is_empty() {
            return Err(DeviceError::connection(format!(
                "Router {} has no base URL",
                router.name
            )));
        }
        let device = RestDevice::new(self.client.clone(), router);
        device.ping().await?;
        debug!("Connected to router {} at {}", router.name, router.base_url);
        Ok(Arc::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_base_url_is_normalized() {
        let router = RouterConnection::new(Uuid::new_v4(), "core", "https://10.0.0.1/")
            .with_credentials("api", "secret");
        let device = RestDevice::new(Client::new(), &router);
        assert_eq!(device.base_url, "https://10.0.0.1");
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_base_url() {
        let connector = RestConnector::new(Duration::from_secs(1)).unwrap();
        let router = RouterConnection::new(Uuid::new_v4(), "core", "  ");
        let result = connector.connect(&router).await;
        assert!(matches!(result, Err(DeviceError::Connection { .. })));
    }
}
