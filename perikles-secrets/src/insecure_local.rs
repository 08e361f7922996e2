//! In-memory, unencrypted secret store for tests and local development.
//!
//! Mirrors the shape of [`crate::vault::VaultBackend`] without any network
//! or sealing semantics. Never use this outside tests: secrets are held
//! plaintext in process memory and nothing is persisted.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::Mutex;

use crate::{
    AutoUnsealInitResult, InitResult, JoinResult, SecretData, SecretStore, SecretStoreError,
    SecretStoreStatus,
};

#[derive(Default)]
struct State {
    secrets: HashMap<String, serde_json::Value>,
    policies: HashMap<String, Vec<u8>>,
    /// token -> policies it was scoped to; removed on first redemption so a
    /// second `get_secret` under the same token fails closed.
    live_tokens: HashMap<String, Vec<String>>,
    redeemed_tokens: HashSet<String>,
    current_token: Option<String>,
    sealed: bool,
}

pub struct InsecureLocalBackend {
    state: Mutex<State>,
}

impl Default for InsecureLocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InsecureLocalBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sealed: false,
                ..Default::default()
            }),
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl SecretStore for InsecureLocalBackend {
    async fn status(&self) -> Result<SecretStoreStatus, SecretStoreError> {
        let state = self.state.lock().await;
        Ok(SecretStoreStatus {
            initialized: true,
            sealed: state.sealed,
        })
    }

    async fn initialize(&self, shares: u8, threshold: u8) -> Result<InitResult, SecretStoreError> {
        let keys = (0..shares).map(|_| random_token()).collect();
        let _ = threshold;
        Ok(InitResult {
            root_token: random_token(),
            keys,
        })
    }

    async fn initialize_auto_unseal(
        &self,
        recovery_shares: u8,
        recovery_threshold: u8,
    ) -> Result<AutoUnsealInitResult, SecretStoreError> {
        let recovery_keys = (0..recovery_shares).map(|_| random_token()).collect();
        let _ = recovery_threshold;
        Ok(AutoUnsealInitResult {
            root_token: random_token(),
            recovery_keys,
        })
    }

    async fn unseal(&self, _keys: &[String]) -> Result<(), SecretStoreError> {
        self.state.lock().await.sealed = false;
        Ok(())
    }

    async fn auto_unseal_gcp(
        &self,
        _key_ring: &str,
        _crypto_key: &str,
        _location: &str,
        _recovery_keys: &[String],
    ) -> Result<(), SecretStoreError> {
        self.state.lock().await.sealed = false;
        Ok(())
    }

    async fn login_with_root_token(&self, token: &str) -> Result<(), SecretStoreError> {
        self.state.lock().await.current_token = Some(token.to_string());
        Ok(())
    }

    async fn write_policy(&self, name: &str, hcl: &[u8]) -> Result<(), SecretStoreError> {
        self.state
            .lock()
            .await
            .policies
            .insert(name.to_string(), hcl.to_vec());
        Ok(())
    }

    async fn enable_kv_secrets_engine(
        &self,
        _mount: &str,
        _path: &str,
    ) -> Result<(), SecretStoreError> {
        Ok(())
    }

    async fn kubernetes_auth_method(
        &self,
        _policy: &str,
        _service_account: &str,
        _namespace: &str,
        _kube_api_url: &str,
    ) -> Result<(), SecretStoreError> {
        Ok(())
    }

    async fn create_one_time_token(&self, policies: &[String]) -> Result<String, SecretStoreError> {
        let token = random_token();
        let mut state = self.state.lock().await;
        state.live_tokens.insert(token.clone(), policies.to_vec());
        Ok(token)
    }

    async fn set_onetime_token(&self, token: &str) -> Result<(), SecretStoreError> {
        self.state.lock().await.current_token = Some(token.to_string());
        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<SecretData, SecretStoreError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.current_token.clone() {
            if state.live_tokens.contains_key(&token) {
                if state.redeemed_tokens.contains(&token) {
                    return Err(SecretStoreError::TokenRejected);
                }
                state.redeemed_tokens.insert(token.clone());
                state.live_tokens.remove(&token);
            } else if state.redeemed_tokens.contains(&token) {
                return Err(SecretStoreError::TokenRejected);
            }
        }
        state
            .secrets
            .get(path)
            .cloned()
            .map(|data| SecretData {
                data,
                request_id: random_token(),
            })
            .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))
    }

    async fn create_new_secret(&self, path: &str, bytes: &[u8]) -> Result<bool, SecretStoreError> {
        let data: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SecretStoreError::Other(e.to_string()))?;
        self.state.lock().await.secrets.insert(path.to_string(), data);
        Ok(true)
    }

    async fn delete_secret(&self, path: &str) -> Result<(), SecretStoreError> {
        self.state.lock().await.secrets.remove(path);
        Ok(())
    }

    async fn remove_secret(&self, path: &str) -> Result<(), SecretStoreError> {
        self.state.lock().await.secrets.remove(path);
        Ok(())
    }

    async fn list_secrets(&self) -> Result<Vec<String>, SecretStoreError> {
        Ok(self.state.lock().await.secrets.keys().cloned().collect())
    }

    async fn list_policies(&self) -> Result<Vec<String>, SecretStoreError> {
        Ok(self.state.lock().await.policies.keys().cloned().collect())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), SecretStoreError> {
        self.state.lock().await.policies.remove(name);
        Ok(())
    }

    async fn raft_join(
        &self,
        _primary_addr: &str,
        _cert: &[u8],
        _key: &[u8],
        _ca: &[u8],
    ) -> Result<JoinResult, SecretStoreError> {
        Ok(JoinResult { joined: true })
    }

    async fn leader(&self) -> Result<bool, SecretStoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_time_token_redeemable_exactly_once() {
        let store = InsecureLocalBackend::new();
        store
            .create_new_secret("configs/sokrates-xyz", br#"{"username":"sokrates"}"#)
            .await
            .unwrap();
        let token = store
            .create_one_time_token(&["policy-sokrates-xyz".to_string()])
            .await
            .unwrap();

        store.set_onetime_token(&token).await.unwrap();
        let first = store.get_secret("configs/sokrates-xyz").await;
        assert!(first.is_ok());

        store.set_onetime_token(&token).await.unwrap();
        let second = store.get_secret("configs/sokrates-xyz").await;
        assert!(matches!(second, Err(SecretStoreError::TokenRejected)));
    }

    #[tokio::test]
    async fn get_secret_missing_path_is_not_found() {
        let store = InsecureLocalBackend::new();
        let err = store.get_secret("configs/ghost").await.unwrap_err();
        assert!(matches!(err, SecretStoreError::NotFound(_)));
    }
}
