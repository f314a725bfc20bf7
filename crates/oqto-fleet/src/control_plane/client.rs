//! Control-plane HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ControlPlaneError, ControlPlaneResult};
use super::types::*;
use super::ControlPlaneApi;

/// Connection settings for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Base URL, e.g. "https://deploy.example.com". Procedures live under `/api/`.
    pub base_url: String,
    /// Sent as `x-api-key` on every request.
    pub api_key: String,
    /// Project new applications are created in.
    pub project_id: Option<String>,
    /// Per-request timeout.
    pub timeout_seconds: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            project_id: None,
            timeout_seconds: 30,
        }
    }
}

/// Client for the control plane's procedure API.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ControlPlaneClient {
    pub fn new(config: &ControlPlaneConfig) -> ControlPlaneResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ControlPlaneError::Config(
                "control_plane.base_url is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/api/{}", self.base_url, procedure)
    }

    /// POST a JSON body to a mutation procedure.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        procedure: &str,
        body: &B,
    ) -> ControlPlaneResult<reqwest::Response> {
        debug!("control plane POST {}", procedure);
        let response = self
            .client
            .post(self.url(procedure))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        Self::check(procedure, response).await
    }

    /// GET a query procedure.
    async fn query(
        &self,
        procedure: &str,
        params: &[(&str, String)],
    ) -> ControlPlaneResult<reqwest::Response> {
        debug!("control plane GET {}", procedure);
        let response = self
            .client
            .get(self.url(procedure))
            .header("x-api-key", &self.api_key)
            .query(params)
            .send()
            .await?;

        Self::check(procedure, response).await
    }

    /// Turn a non-2xx response into [`ControlPlaneError::Api`], keeping the body.
    async fn check(
        procedure: &str,
        response: reqwest::Response,
    ) -> ControlPlaneResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ControlPlaneError::Api {
            endpoint: procedure.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn parse<T: DeserializeOwned>(
        procedure: &str,
        response: reqwest::Response,
    ) -> ControlPlaneResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ControlPlaneError::ParseError {
            endpoint: procedure.to_string(),
            message: e.to_string(),
        })
    }

    async fn application_action(
        &self,
        procedure: &str,
        application_id: &str,
    ) -> ControlPlaneResult<()> {
        let body = ApplicationRef {
            application_id: application_id.to_string(),
        };
        self.mutate(procedure, &body).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneApi for ControlPlaneClient {
    async fn create_application(
        &self,
        request: CreateApplicationRequest,
    ) -> ControlPlaneResult<Application> {
        let response = self.mutate("application.create", &request).await?;
        Self::parse("application.create", response).await
    }

    async fn update_application(
        &self,
        request: UpdateApplicationRequest,
    ) -> ControlPlaneResult<()> {
        self.mutate("application.update", &request).await?;
        Ok(())
    }

    async fn save_environment(&self, request: SaveEnvironmentRequest) -> ControlPlaneResult<()> {
        self.mutate("application.saveEnvironment", &request).await?;
        Ok(())
    }

    async fn save_build_config(&self, request: BuildConfig) -> ControlPlaneResult<()> {
        self.mutate("application.saveDockerProvider", &request)
            .await?;
        Ok(())
    }

    async fn save_placement_constraints(
        &self,
        request: PlacementRequest,
    ) -> ControlPlaneResult<()> {
        self.mutate("application.update", &request).await?;
        Ok(())
    }

    async fn create_mount(&self, request: CreateMountRequest) -> ControlPlaneResult<Mount> {
        let response = self.mutate("mounts.create", &request).await?;
        Self::parse("mounts.create", response).await
    }

    async fn create_domain(&self, request: DomainSpec) -> ControlPlaneResult<Domain> {
        let response = self.mutate("domain.create", &request).await?;
        Self::parse("domain.create", response).await
    }

    async fn update_domain(&self, request: UpdateDomainRequest) -> ControlPlaneResult<()> {
        self.mutate("domain.update", &request).await?;
        Ok(())
    }

    async fn deploy_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.application_action("application.deploy", application_id)
            .await
    }

    async fn stop_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.application_action("application.stop", application_id)
            .await
    }

    async fn start_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.application_action("application.start", application_id)
            .await
    }

    async fn delete_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.application_action("application.delete", application_id)
            .await
    }

    async fn fetch_logs(&self, application_id: &str, tail: u32) -> ControlPlaneResult<String> {
        let response = self
            .query(
                "application.readLogs",
                &[
                    ("applicationId", application_id.to_string()),
                    ("tail", tail.to_string()),
                ],
            )
            .await?;

        // Logs come back either as a JSON string or as plain text.
        let text = response.text().await?;
        Ok(serde_json::from_str::<String>(&text).unwrap_or(text))
    }

    async fn fetch_deployment_logs(
        &self,
        application_id: &str,
    ) -> ControlPlaneResult<Vec<Deployment>> {
        let response = self
            .query(
                "deployment.all",
                &[("applicationId", application_id.to_string())],
            )
            .await?;
        Self::parse("deployment.all", response).await
    }
}
