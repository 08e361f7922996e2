//! The `Ptolemaios` gRPC service: fetches a one-time token from the
//! identity registrar, redeems it against the sealed secret store, and
//! hands the caller back an Elasticsearch credential. Grounded on
//! spec §4.7's broker algorithm; the duplicate `Aristides` surface named
//! alongside it in the source is intentionally not reproduced (see
//! `perikles-proto`'s note on the same point).

use std::sync::Arc;
use std::time::Duration;

use perikles_proto::ptolemaios_server::Ptolemaios;
use perikles_proto::{
    ElasticConfigVault, HealthRequest, HealthResponse, ShutDownRequest, ShutDownResponse,
    VaultRequest, VaultRequestNamed,
};
use perikles_secrets::SecretStore;
use tonic::{Request, Response, Status};

use crate::env_config::EnvConfig;

const TRACE_ID_METADATA_KEY: &str = "traceid";

pub struct CredentialBroker {
    env: EnvConfig,
    secrets: Arc<dyn SecretStore>,
    http: reqwest::Client,
}

impl CredentialBroker {
    pub fn new(env: EnvConfig, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            env,
            secrets,
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_one_time_token(&self) -> Result<String, Status> {
        let url = format!(
            "{}/solon/v1/token",
            self.env.identity_registrar_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Status::unavailable(format!("identity registrar unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(Status::unauthenticated(format!(
                "identity registrar rejected token request: {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Status::internal(format!("malformed token response: {e}")))?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Status::internal("token response missing token field"))
    }

    async fn fetch_credential(&self, target_pod_name: &str) -> Result<ElasticConfigVault, Status> {
        let token = self.fetch_one_time_token().await?;
        self.secrets
            .set_onetime_token(&token)
            .await
            .map_err(|e| Status::internal(format!("failed to set one-time token: {e}")))?;

        let path = format!("configs/{target_pod_name}");
        let secret = self.secrets.get_secret(&path).await.map_err(|e| {
            use perikles_secrets::SecretStoreError;
            match e {
                SecretStoreError::TokenRejected => Status::unauthenticated("token rejected"),
                SecretStoreError::NotFound(_) => Status::not_found("secret empty"),
                other => Status::internal(other.to_string()),
            }
        })?;

        if secret.data.is_null() {
            return Err(Status::not_found("secret empty"));
        }

        Ok(ElasticConfigVault {
            elastic_username: secret.data["username"].as_str().unwrap_or_default().to_string(),
            elastic_password: secret.data["password"].as_str().unwrap_or_default().to_string(),
            elastic_cert: secret.data["caCert"].as_str().unwrap_or_default().to_string(),
        })
    }

    fn trace_id(metadata: &tonic::metadata::MetadataMap) -> Option<String> {
        metadata
            .get(TRACE_ID_METADATA_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn respond_with_trace_id<T>(trace_id: Option<String>, body: T) -> Response<T> {
        let mut response = Response::new(body);
        if let Some(trace_id) = trace_id {
            if let Ok(value) = trace_id.parse() {
                response.metadata_mut().insert(TRACE_ID_METADATA_KEY, value);
            }
        }
        response
    }
}

#[tonic::async_trait]
impl Ptolemaios for CredentialBroker {
    async fn get_secret(
        &self,
        request: Request<VaultRequest>,
    ) -> Result<Response<ElasticConfigVault>, Status> {
        let trace_id = Self::trace_id(request.metadata());
        if let Some(ref id) = trace_id {
            tracing::info!(trace_id = %id, "GetSecret");
        }
        let cred = self.fetch_credential(&self.env.pod_name).await?;
        Ok(Self::respond_with_trace_id(trace_id, cred))
    }

    async fn get_named_secret(
        &self,
        request: Request<VaultRequestNamed>,
    ) -> Result<Response<ElasticConfigVault>, Status> {
        let trace_id = Self::trace_id(request.metadata());
        if let Some(ref id) = trace_id {
            tracing::info!(trace_id = %id, pod = %request.get_ref().pod_name, "GetNamedSecret");
        }
        let target = request.into_inner().pod_name;
        let cred = self.fetch_credential(&target).await?;
        Ok(Self::respond_with_trace_id(trace_id, cred))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let healthy = self
            .secrets
            .status()
            .await
            .map(|s| s.initialized && !s.sealed)
            .unwrap_or(false);
        Ok(Response::new(HealthResponse { health: healthy }))
    }

    async fn shut_down(
        &self,
        request: Request<ShutDownRequest>,
    ) -> Result<Response<ShutDownResponse>, Status> {
        let code = request.into_inner().code;
        tracing::warn!(code, "ShutDown requested, exiting after response");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::process::exit(code);
        });
        Ok(Response::new(ShutDownResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_extraction_is_case_insensitive_to_metadata_key() {
        let mut metadata = tonic::metadata::MetadataMap::new();
        metadata.insert("traceid", "abc-123".parse().unwrap());
        assert_eq!(CredentialBroker::trace_id(&metadata), Some("abc-123".to_string()));
    }

    #[test]
    fn missing_trace_id_is_none() {
        let metadata = tonic::metadata::MetadataMap::new();
        assert_eq!(CredentialBroker::trace_id(&metadata), None);
    }
}
