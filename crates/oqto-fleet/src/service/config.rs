//! Settings consumed by the provisioning pipeline.

use serde::{Deserialize, Serialize};

/// Runtime image every session instance runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub image: String,
    pub registry_url: Option<String>,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    /// Port the instance listens on behind the router.
    pub port: u16,
    /// Where the session volume is mounted inside the instance.
    pub workspace_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: "oqto-session:latest".to_string(),
            registry_url: None,
            registry_username: None,
            registry_password: None,
            port: 8080,
            workspace_path: "/workspace".to_string(),
        }
    }
}

/// Ingress routing for session instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Shared public hostname.
    pub host: String,
    /// First path segment; sessions are served at `/<prefix>/<session_id>`.
    pub path_prefix: String,
    pub https: bool,
    pub certificate_type: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            path_prefix: "sessions".to_string(),
            https: true,
            certificate_type: "letsencrypt".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Path a session is routed under.
    pub fn session_path(&self, session_id: &str) -> String {
        let prefix = self.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("/{}", session_id)
        } else {
            format!("/{}/{}", prefix, session_id)
        }
    }

    /// Public URL of a session.
    pub fn session_url(&self, session_id: &str) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host, self.session_path(session_id))
    }
}

/// How session instances identify themselves and reach the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HS256 secret for session tokens. Random opaque tokens when unset.
    pub token_secret: Option<String>,
    pub token_ttl_days: u32,
    /// Platform base URL the instance calls back into.
    pub platform_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_days: 30,
            platform_url: "http://localhost:8080".to_string(),
        }
    }
}
