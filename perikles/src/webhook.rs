//! Admission Webhook (C5): `POST /perikles/v1/validate`.
//!
//! Unlike a conventional validating webhook this one never denies — its
//! purpose is to observe every Deployment/Job create and hand the parsed
//! annotation set to the compiler (C6) as a detached background task, so
//! the admission response itself is never held up by cluster writes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};

use crate::annotations::WorkloadAnnotations;
use crate::compiler::{self, CompileInput, WorkloadKind};
use crate::ctx::Ctx;

pub const VALIDATE_PATH: &str = "/perikles/v1/validate";
pub const HEALTHZ_PATH: &str = "/healthz";

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
}

#[derive(Debug, Deserialize)]
struct AdmissionReview {
    request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
struct AdmissionRequest {
    uid: String,
    kind: Option<RequestKind>,
    object: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RequestKind {
    kind: String,
}

pub fn router(ctx: Arc<Ctx>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate))
        .route(HEALTHZ_PATH, get(healthz))
        .with_state(ctx)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn validate(State(ctx): State<Arc<Ctx>>, body: axum::body::Bytes) -> impl IntoResponse {
    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            tracing::warn!(%err, "admission review body did not parse");
            return (
                StatusCode::BAD_REQUEST,
                Json(ValidationError::single("body", format!("admission review body did not parse: {err}"))),
            )
                .into_response();
        }
    };

    let Some(request) = review.request else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ValidationError::single("request", "admission review missing request")),
        )
            .into_response();
    };

    let uid = request.uid.clone();
    match compile_input_from_request(&request) {
        Some(input) => {
            tokio::spawn(compiler::compile(ctx, input));
        }
        None => {
            tracing::warn!(uid = %uid, "admission request not recognized as Deployment/Job; allowing without compiling");
        }
    }

    Json(allow_response(uid)).into_response()
}

fn allow_response(uid: String) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": { "uid": uid, "allowed": true },
    })
}

fn compile_input_from_request(request: &AdmissionRequest) -> Option<CompileInput> {
    let kind = request.kind.as_ref().map(|k| k.kind.as_str()).unwrap_or("");
    let object = request.object.as_ref()?;
    match kind {
        "Deployment" => compile_input_from_deployment(object),
        "Job" => compile_input_from_job(object),
        _ => None,
    }
}

fn compile_input_from_deployment(value: &serde_json::Value) -> Option<CompileInput> {
    let deployment: Deployment = serde_json::from_value(value.clone()).ok()?;
    let name = deployment.metadata.name?;
    let namespace = deployment.metadata.namespace.unwrap_or_default();
    let pod_spec = deployment.spec?.template;
    let annotations = pod_spec
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let pod_spec = pod_spec.spec.unwrap_or_default();
    let secret_volume_names = pod_spec
        .volumes
        .unwrap_or_default()
        .into_iter()
        .filter(|v| v.secret.is_some())
        .map(|v| v.name)
        .collect();
    let container_names = pod_spec.containers.into_iter().map(|c| c.name).collect();

    Some(CompileInput {
        kind: WorkloadKind::Deployment,
        name,
        namespace,
        annotations: WorkloadAnnotations::from_map(&annotations.into_iter().collect()),
        secret_volume_names,
        container_names,
    })
}

fn compile_input_from_job(value: &serde_json::Value) -> Option<CompileInput> {
    let job: Job = serde_json::from_value(value.clone()).ok()?;
    let name = job.metadata.name?;
    let namespace = job.metadata.namespace.unwrap_or_default();
    let pod_spec = job.spec?.template;
    let annotations = pod_spec
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let container_names = pod_spec
        .spec
        .unwrap_or_default()
        .containers
        .into_iter()
        .map(|c| c.name)
        .collect();

    Some(CompileInput {
        kind: WorkloadKind::Job,
        name,
        namespace,
        annotations: WorkloadAnnotations::from_map(&annotations.into_iter().collect()),
        secret_volume_names: Vec::new(),
        container_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_without_name_is_rejected() {
        let value = serde_json::json!({ "spec": { "template": {} } });
        assert!(compile_input_from_deployment(&value).is_none());
    }

    #[test]
    fn deployment_annotations_and_volumes_are_extracted() {
        let value = serde_json::json!({
            "metadata": { "name": "perikles", "namespace": "odysseia" },
            "spec": {
                "template": {
                    "metadata": { "annotations": { "perikles/hostname": "perikles" } },
                    "spec": {
                        "containers": [{ "name": "perikles", "image": "perikles:latest" }],
                        "volumes": [{ "name": "perikles-tls-certs", "secret": { "secretName": "perikles-tls-certs" } }],
                    }
                }
            }
        });
        let input = compile_input_from_deployment(&value).expect("valid deployment");
        assert_eq!(input.name, "perikles");
        assert_eq!(input.annotations.hostname.as_deref(), Some("perikles"));
        assert_eq!(input.secret_volume_names, vec!["perikles-tls-certs".to_string()]);
        assert_eq!(input.container_names, vec!["perikles".to_string()]);
    }

    #[test]
    fn validation_error_carries_one_message_naming_the_bad_field() {
        let err = ValidationError::single("request", "admission review missing request");
        assert_eq!(err.messages.len(), 1);
        assert_eq!(err.messages[0].field, "request");
        assert_eq!(err.messages[0].message, "admission review missing request");
    }
}
