//! HTTP surface: health, one-time token issuance, and service registration.
//! Grounded on `original_source/solon/lawgiver/handlers.go`'s `Health`,
//! `CreateOneTimeToken`, and `RegisterService` handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ctx::SolonCtx;
use crate::pod_verify::verify_origin_pod;

const PASSWORD_LEN: usize = 18;
const HEALTH_PATH: &str = "/solon/v1/health";
const TOKEN_PATH: &str = "/solon/v1/token";
const REGISTER_PATH: &str = "/solon/v1/register";
const HEALTHZ_PATH: &str = "/healthz";

#[derive(Debug, Serialize)]
struct ValidationMessage {
    field: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ValidationError {
    messages: Vec<ValidationMessage>,
}

impl ValidationError {
    fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            messages: vec![ValidationMessage {
                field: field.to_string(),
                message: message.into(),
            }],
        }
    }

    fn response(field: &str, message: impl Into<String>) -> Response {
        (StatusCode::BAD_REQUEST, Json(Self::single(field, message))).into_response()
    }
}

pub fn router(ctx: Arc<SolonCtx>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(HEALTHZ_PATH, get(healthz))
        .route(TOKEN_PATH, get(issue_token))
        .route(REGISTER_PATH, post(register))
        .with_state(ctx)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    secrets_healthy: bool,
    elastic_healthy: bool,
}

async fn health(State(ctx): State<Arc<SolonCtx>>) -> Response {
    let secrets_healthy = ctx
        .secrets
        .status()
        .await
        .map(|s| s.initialized && !s.sealed)
        .unwrap_or(false);
    let elastic_healthy = ctx.elastic.health().await.map(|h| h.healthy).unwrap_or(false);

    let body = HealthResponse {
        secrets_healthy,
        elastic_healthy,
    };
    let status = if secrets_healthy && elastic_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

fn policy_hcl(pod_name: &str) -> Vec<u8> {
    format!(
        "path \"configs/data/{pod_name}\" {{\n  capabilities = [\"read\", \"list\"]\n}}\n"
    )
    .into_bytes()
}

async fn issue_token(
    State(ctx): State<Arc<SolonCtx>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let pod = match verify_origin_pod(&ctx.gateway, &ctx.env.namespace, peer.ip()).await {
        Ok(pod) => pod,
        Err(err) => {
            tracing::warn!(%err, "token request origin could not be verified");
            return ValidationError::response("origin", err.to_string());
        }
    };
    let pod_name = match pod.metadata.name {
        Some(name) => name,
        None => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let policy_name = format!("policy-{pod_name}");
    if let Err(err) = ctx.secrets.write_policy(&policy_name, &policy_hcl(&pod_name)).await {
        tracing::error!(%err, pod = %pod_name, "failed to write one-time-token policy");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match ctx.secrets.create_one_time_token(&[policy_name]).await {
        Ok(token) => Json(TokenResponse { token }).into_response(),
        Err(err) => {
            tracing::error!(%err, pod = %pod_name, "failed to mint one-time token");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    role: String,
    access: Vec<String>,
    #[serde(rename = "podName")]
    pod_name: String,
    username: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    #[serde(rename = "userCreated")]
    user_created: bool,
    #[serde(rename = "secretCreated")]
    secret_created: bool,
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn role_names(access: &[String], role: &str) -> Vec<String> {
    access.iter().map(|a| format!("{a}_{role}")).collect()
}

async fn register(
    State(ctx): State<Arc<SolonCtx>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    let pod = match verify_origin_pod(&ctx.gateway, &ctx.env.namespace, peer.ip()).await {
        Ok(pod) => pod,
        Err(err) => {
            tracing::warn!(%err, "register request origin could not be verified");
            return ValidationError::response("origin", err.to_string());
        }
    };
    let pod_name = match &pod.metadata.name {
        Some(name) => name.clone(),
        None => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    if pod_name != body.pod_name {
        tracing::warn!(
            claimed = %body.pod_name,
            actual = %pod_name,
            "illegal action: register request claimed a pod name that does not match its origin"
        );
        return ValidationError::response(
            "podName",
            format!("pod name {} does not match the requesting pod", body.pod_name),
        );
    }

    let annotations = pod.metadata.annotations.unwrap_or_default();
    let allowed_access: Vec<&str> = annotations
        .get(&ctx.env.access_annotation)
        .map(|v| v.split(';').map(str::trim).collect())
        .unwrap_or_default();
    let allowed_role = annotations.get(&ctx.env.role_annotation).map(String::as_str);

    let role_matches = allowed_role == Some(body.role.as_str());
    let access_matches = body.access.iter().all(|a| allowed_access.contains(&a.as_str()));
    if !role_matches || !access_matches {
        tracing::warn!(pod = %pod_name, "register request failed the annotation check");
        return ValidationError::response(
            "access",
            format!("pod {pod_name} is not permitted the requested role/access"),
        );
    }

    let password = generate_password();
    let roles = role_names(&body.access, &body.role);
    let user_created = match ctx.elastic.create_user(&body.username, &password, &roles).await {
        Ok(created) => created,
        Err(err) => {
            tracing::error!(%err, pod = %pod_name, "failed to create elasticsearch user");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let ca_cert = tokio::fs::read_to_string(&ctx.env.ca_cert_path).await.unwrap_or_default();
    let record = serde_json::json!({
        "username": body.username,
        "password": password,
        "caCert": ca_cert,
    });
    let secret_path = format!("configs/{pod_name}");
    let secret_created = match ctx
        .secrets
        .create_new_secret(&secret_path, record.to_string().as_bytes())
        .await
    {
        Ok(created) => created,
        Err(err) => {
            tracing::error!(%err, pod = %pod_name, "failed to seal registration credential record");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_created,
            secret_created,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_compose_access_and_role() {
        let names = role_names(&["read".to_string(), "write".to_string()], "odysseia");
        assert_eq!(names, vec!["read_odysseia".to_string(), "write_odysseia".to_string()]);
    }

    #[test]
    fn generated_password_has_expected_length() {
        assert_eq!(generate_password().chars().count(), PASSWORD_LEN);
    }

    #[test]
    fn policy_hcl_names_the_pod_scoped_path() {
        let hcl = String::from_utf8(policy_hcl("herodotos-abc123")).unwrap();
        assert!(hcl.contains("configs/data/herodotos-abc123"));
        assert!(hcl.contains("read"));
    }

    #[tokio::test]
    async fn validation_error_response_is_400_and_names_the_field() {
        let response = ValidationError::response("podName", "pod name odysseia-bad does not match the requesting pod");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["messages"][0]["field"], "podName");
        assert!(json["messages"][0]["message"]
            .as_str()
            .unwrap()
            .contains("odysseia-bad"));
    }
}
