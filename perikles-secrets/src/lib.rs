//! Client abstraction over a sealed KV secret store (Vault/OpenBao-compatible).
//!
//! [`SecretStore`] is the full contract: init/unseal lifecycle, ACL policy
//! management, one-time token minting, and plain secret CRUD. Two
//! implementations ship here: [`vault::VaultBackend`] talks to a real
//! Vault-compatible HTTP API, and [`insecure_local::InsecureLocalBackend`]
//! is an in-memory stand-in for tests and local development.

pub mod insecure_local;
pub mod vault;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret store is sealed")]
    Sealed,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("token rejected or already redeemed")]
    TokenRejected,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("secret store error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretStoreStatus {
    pub initialized: bool,
    pub sealed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResult {
    pub root_token: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoUnsealInitResult {
    pub root_token: String,
    pub recovery_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretData {
    pub data: serde_json::Value,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinResult {
    pub joined: bool,
}

/// Full contract of a sealed KV secret store client, per the platform's
/// credential-broker and identity-registrar needs.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn status(&self) -> Result<SecretStoreStatus, SecretStoreError>;

    async fn initialize(&self, shares: u8, threshold: u8) -> Result<InitResult, SecretStoreError>;

    async fn initialize_auto_unseal(
        &self,
        recovery_shares: u8,
        recovery_threshold: u8,
    ) -> Result<AutoUnsealInitResult, SecretStoreError>;

    async fn unseal(&self, keys: &[String]) -> Result<(), SecretStoreError>;

    async fn auto_unseal_gcp(
        &self,
        key_ring: &str,
        crypto_key: &str,
        location: &str,
        recovery_keys: &[String],
    ) -> Result<(), SecretStoreError>;

    async fn login_with_root_token(&self, token: &str) -> Result<(), SecretStoreError>;

    async fn write_policy(&self, name: &str, hcl: &[u8]) -> Result<(), SecretStoreError>;

    async fn enable_kv_secrets_engine(&self, mount: &str, path: &str)
        -> Result<(), SecretStoreError>;

    async fn kubernetes_auth_method(
        &self,
        policy: &str,
        service_account: &str,
        namespace: &str,
        kube_api_url: &str,
    ) -> Result<(), SecretStoreError>;

    /// Mints a single-use token scoped only to `policies`. The returned
    /// token MUST fail closed on a second redemption.
    async fn create_one_time_token(&self, policies: &[String]) -> Result<String, SecretStoreError>;

    /// Sets the token used for subsequent calls made through this handle.
    async fn set_onetime_token(&self, token: &str) -> Result<(), SecretStoreError>;

    async fn get_secret(&self, path: &str) -> Result<SecretData, SecretStoreError>;

    async fn create_new_secret(&self, path: &str, bytes: &[u8]) -> Result<bool, SecretStoreError>;

    /// Soft delete: the path is deactivated but its last version is
    /// recoverable.
    async fn delete_secret(&self, path: &str) -> Result<(), SecretStoreError>;

    /// Hard delete: the path and all its versions are destroyed.
    async fn remove_secret(&self, path: &str) -> Result<(), SecretStoreError>;

    async fn list_secrets(&self) -> Result<Vec<String>, SecretStoreError>;

    async fn list_policies(&self) -> Result<Vec<String>, SecretStoreError>;

    async fn delete_policy(&self, name: &str) -> Result<(), SecretStoreError>;

    async fn raft_join(
        &self,
        primary_addr: &str,
        cert: &[u8],
        key: &[u8],
        ca: &[u8],
    ) -> Result<JoinResult, SecretStoreError>;

    async fn leader(&self) -> Result<bool, SecretStoreError>;
}
