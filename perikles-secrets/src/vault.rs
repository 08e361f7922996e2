//! HTTP client for a Vault/OpenBao-compatible sealed KV store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::json;
use tokio::sync::Mutex;

use crate::{
    AutoUnsealInitResult, InitResult, JoinResult, SecretData, SecretStore, SecretStoreError,
    SecretStoreStatus,
};

/// A cached auth token. One-time tokens self-evict a few seconds after
/// being set, so a crashed caller can't accidentally reuse a stale handle.
struct TokenState {
    value: Option<Arc<String>>,
    ephemeral: bool,
}

pub struct VaultBackend {
    client: Client,
    base_url: String,
    token: Arc<Mutex<TokenState>>,
}

impl VaultBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: Arc::new(Mutex::new(TokenState {
                value: None,
                ephemeral: false,
            })),
        }
    }

    async fn current_token(&self) -> Option<Arc<String>> {
        self.token.lock().await.value.clone()
    }

    async fn set_token(&self, token: String, ephemeral: bool) {
        let arc = Arc::new(token);
        {
            let mut guard = self.token.lock().await;
            guard.value = Some(arc.clone());
            guard.ephemeral = ephemeral;
        }
        if ephemeral {
            let token_cell = self.token.clone();
            let expected = arc;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let mut guard = token_cell.lock().await;
                if guard.ephemeral && guard.value.as_ref() == Some(&expected) {
                    guard.value = None;
                }
            });
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.current_token().await {
            Some(token) => req.header("X-Vault-Token", token.as_str()),
            None => req,
        }
    }

    fn status_for(resp: &reqwest::StatusCode) -> Result<(), SecretStoreError> {
        if resp.is_success() {
            Ok(())
        } else if resp.as_u16() == 404 {
            Err(SecretStoreError::NotFound(resp.to_string()))
        } else if resp.as_u16() == 503 {
            Err(SecretStoreError::Sealed)
        } else {
            Err(SecretStoreError::Other(format!("status store returned {resp}")))
        }
    }
}

#[async_trait]
impl SecretStore for VaultBackend {
    async fn status(&self) -> Result<SecretStoreStatus, SecretStoreError> {
        let resp = self.client.get(self.url("/v1/sys/health")).send().await?;
        // Vault's health endpoint uses status codes to signal sealed/uninitialized
        // as well as the body, so accept both 200 (unsealed) and 503 (sealed) here.
        let body: serde_json::Value = resp.json().await?;
        Ok(SecretStoreStatus {
            initialized: body["initialized"].as_bool().unwrap_or(false),
            sealed: body["sealed"].as_bool().unwrap_or(true),
        })
    }

    async fn initialize(&self, shares: u8, threshold: u8) -> Result<InitResult, SecretStoreError> {
        let resp = self
            .client
            .put(self.url("/v1/sys/init"))
            .json(&json!({ "secret_shares": shares, "secret_threshold": threshold }))
            .send()
            .await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(InitResult {
            root_token: body["root_token"].as_str().unwrap_or_default().to_string(),
            keys: body["keys"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
        })
    }

    async fn initialize_auto_unseal(
        &self,
        recovery_shares: u8,
        recovery_threshold: u8,
    ) -> Result<AutoUnsealInitResult, SecretStoreError> {
        let resp = self
            .client
            .put(self.url("/v1/sys/init"))
            .json(&json!({
                "recovery_shares": recovery_shares,
                "recovery_threshold": recovery_threshold,
            }))
            .send()
            .await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(AutoUnsealInitResult {
            root_token: body["root_token"].as_str().unwrap_or_default().to_string(),
            recovery_keys: body["recovery_keys"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
        })
    }

    async fn unseal(&self, keys: &[String]) -> Result<(), SecretStoreError> {
        for key in keys {
            let resp = self
                .client
                .put(self.url("/v1/sys/unseal"))
                .json(&json!({ "key": key }))
                .send()
                .await?;
            Self::status_for(&resp.status())?;
        }
        Ok(())
    }

    async fn auto_unseal_gcp(
        &self,
        key_ring: &str,
        crypto_key: &str,
        location: &str,
        recovery_keys: &[String],
    ) -> Result<(), SecretStoreError> {
        tracing::debug!(key_ring, crypto_key, location, "unsealing via GCP KMS seal config");
        // The server is already configured against the KMS key described by
        // `key_ring`/`crypto_key`/`location`; recovery keys complete the
        // unseal the same way raw unseal keys would on a non-auto-unseal node.
        self.unseal(recovery_keys).await
    }

    async fn login_with_root_token(&self, token: &str) -> Result<(), SecretStoreError> {
        self.set_token(token.to_string(), false).await;
        Ok(())
    }

    async fn write_policy(&self, name: &str, hcl: &[u8]) -> Result<(), SecretStoreError> {
        let policy = String::from_utf8_lossy(hcl).to_string();
        let req = self
            .client
            .put(self.url(&format!("/v1/sys/policies/acl/{name}")))
            .json(&json!({ "policy": policy }));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())
    }

    async fn enable_kv_secrets_engine(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<(), SecretStoreError> {
        let req = self
            .client
            .post(self.url(&format!("/v1/sys/mounts/{path}")))
            .json(&json!({ "type": mount, "options": { "version": "2" } }));
        let resp = self.authed(req).await.send().await?;
        // Vault returns 400 if the mount already exists; treat that as success.
        if resp.status().as_u16() == 400 {
            return Ok(());
        }
        Self::status_for(&resp.status())
    }

    async fn kubernetes_auth_method(
        &self,
        policy: &str,
        service_account: &str,
        namespace: &str,
        kube_api_url: &str,
    ) -> Result<(), SecretStoreError> {
        let enable_req = self
            .client
            .post(self.url("/v1/sys/auth/kubernetes"))
            .json(&json!({ "type": "kubernetes" }));
        let resp = self.authed(enable_req).await.send().await?;
        if resp.status().as_u16() != 400 {
            Self::status_for(&resp.status())?;
        }

        let config_req = self
            .client
            .post(self.url("/v1/auth/kubernetes/config"))
            .json(&json!({ "kubernetes_host": kube_api_url }));
        let resp = self.authed(config_req).await.send().await?;
        Self::status_for(&resp.status())?;

        let role_req = self
            .client
            .post(self.url(&format!("/v1/auth/kubernetes/role/{service_account}")))
            .json(&json!({
                "bound_service_account_names": [service_account],
                "bound_service_account_namespaces": [namespace],
                "policies": [policy],
            }));
        let resp = self.authed(role_req).await.send().await?;
        Self::status_for(&resp.status())
    }

    async fn create_one_time_token(&self, policies: &[String]) -> Result<String, SecretStoreError> {
        let req = self
            .client
            .post(self.url("/v1/auth/token/create"))
            .json(&json!({ "policies": policies, "num_uses": 1, "ttl": "5m" }));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        body["auth"]["client_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SecretStoreError::Other("token create response missing client_token".into()))
    }

    async fn set_onetime_token(&self, token: &str) -> Result<(), SecretStoreError> {
        self.set_token(token.to_string(), true).await;
        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<SecretData, SecretStoreError> {
        let req = self.client.get(self.url(&format!("/v1/secret/data/{path}")));
        let resp = self.authed(req).await.send().await?;
        if resp.status().as_u16() == 403 {
            return Err(SecretStoreError::TokenRejected);
        }
        if resp.status().as_u16() == 404 {
            return Err(SecretStoreError::NotFound(path.to_string()));
        }
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        let data = body["data"]["data"].clone();
        if data.is_null() {
            return Err(SecretStoreError::Other(format!("secret at {path} was empty")));
        }
        let request_id = body["request_id"].as_str().unwrap_or_default().to_string();
        Ok(SecretData { data, request_id })
    }

    async fn create_new_secret(&self, path: &str, bytes: &[u8]) -> Result<bool, SecretStoreError> {
        let data: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SecretStoreError::Other(e.to_string()))?;
        let req = self
            .client
            .post(self.url(&format!("/v1/secret/data/{path}")))
            .json(&json!({ "data": data }));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())?;
        Ok(true)
    }

    async fn delete_secret(&self, path: &str) -> Result<(), SecretStoreError> {
        let req = self.client.delete(self.url(&format!("/v1/secret/data/{path}")));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())
    }

    async fn remove_secret(&self, path: &str) -> Result<(), SecretStoreError> {
        let req = self.client.delete(self.url(&format!("/v1/secret/metadata/{path}")));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())
    }

    async fn list_secrets(&self) -> Result<Vec<String>, SecretStoreError> {
        let method = Method::from_bytes(b"LIST").expect("LIST is a valid HTTP method token");
        let req = self
            .client
            .request(method, self.url("/v1/secret/metadata"));
        let resp = self.authed(req).await.send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body["data"]["keys"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn list_policies(&self) -> Result<Vec<String>, SecretStoreError> {
        let req = self.client.get(self.url("/v1/sys/policies/acl"));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body["data"]["keys"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), SecretStoreError> {
        let req = self
            .client
            .delete(self.url(&format!("/v1/sys/policies/acl/{name}")));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())
    }

    async fn raft_join(
        &self,
        primary_addr: &str,
        cert: &[u8],
        key: &[u8],
        ca: &[u8],
    ) -> Result<JoinResult, SecretStoreError> {
        let req = self
            .client
            .put(self.url("/v1/sys/storage/raft/join"))
            .json(&json!({
                "leader_api_addr": primary_addr,
                "leader_ca_cert": String::from_utf8_lossy(ca),
                "leader_client_cert": String::from_utf8_lossy(cert),
                "leader_client_key": String::from_utf8_lossy(key),
            }));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(JoinResult {
            joined: body["joined"].as_bool().unwrap_or(false),
        })
    }

    async fn leader(&self) -> Result<bool, SecretStoreError> {
        let req = self.client.get(self.url("/v1/sys/leader"));
        let resp = self.authed(req).await.send().await?;
        Self::status_for(&resp.status())?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body["is_self"].as_bool().unwrap_or(false))
    }
}
