//! Thin client over Elasticsearch's native-realm user API. Mirrors
//! `perikles_secrets::vault::VaultBackend`'s shape (a `reqwest::Client`
//! plus a base URL) for the other sealed-backend-style HTTP surface this
//! platform talks to.

use reqwest::Client;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ElasticError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("elasticsearch returned {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticHealth {
    pub healthy: bool,
    pub cluster_name: String,
}

#[derive(Serialize)]
struct CreateUserRequest<'a> {
    password: &'a str,
    roles: &'a [String],
    full_name: &'a str,
    email: String,
    metadata: serde_json::Value,
}

pub struct ElasticClient {
    client: Client,
    base_url: String,
    admin_username: String,
    admin_password: String,
}

impl ElasticClient {
    pub fn new(base_url: impl Into<String>, admin_username: impl Into<String>, admin_password: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            admin_username: admin_username.into(),
            admin_password: admin_password.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.admin_username, Some(&self.admin_password))
    }

    pub async fn health(&self) -> Result<ElasticHealth, ElasticError> {
        let req = self.client.get(self.url("/_cluster/health"));
        let resp = self.authed(req).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(ElasticHealth {
            healthy: status.is_success(),
            cluster_name: body["cluster_name"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Creates (or overwrites) a native-realm user. Elastic's own semantics
    /// make this idempotent: PUT on an existing username updates it.
    pub async fn create_user(&self, username: &str, password: &str, roles: &[String]) -> Result<bool, ElasticError> {
        let body = CreateUserRequest {
            password,
            roles,
            full_name: username,
            email: format!("{username}@odysseia-greek.com"),
            metadata: json!({ "version": 1 }),
        };
        let req = self
            .client
            .put(self.url(&format!("/_security/user/{username}")))
            .json(&body);
        let resp = self.authed(req).send().await?;
        if resp.status().is_success() {
            Ok(true)
        } else {
            Err(ElasticError::Status(resp.status().as_u16()))
        }
    }

    pub async fn delete_user(&self, username: &str) -> Result<bool, ElasticError> {
        let req = self.client.delete(self.url(&format!("/_security/user/{username}")));
        let resp = self.authed(req).send().await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            code => Err(ElasticError::Status(code)),
        }
    }
}
