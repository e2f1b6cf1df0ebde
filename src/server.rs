//! HTTP endpoint for World ID proof verification

use anyhow::Result;
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::http::{Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::error::VerifierError;
use crate::rate_limiter::RateLimiter;
use crate::recorder::{RecordStore, VerificationRecorder};
use crate::types::{
    format_timestamp, ErrorBody, SuccessBody, SuccessData, UpstreamVerdict, VerificationOutcome,
    VerificationRecord,
};
use crate::validator::{validate_payload, ValidationRules};
use crate::worldid_client::WorldIdClient;

const SUCCESS_MESSAGE: &str = "Verification successful";
const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed. Use POST.";
const RATE_LIMITED_MESSAGE: &str = "Too many verification attempts. Try again later.";
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Characters of the nullifier hash echoed back to the client
const NULLIFIER_PREVIEW_CHARS: usize = 10;

/// Everything a request needs, shared across all in-flight requests
pub struct AppState {
    pub config: Config,
    pub client: WorldIdClient,
    pub recorder: VerificationRecorder,
    pub rate_limiter: Arc<RateLimiter>,
    pub rules: ValidationRules,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let client = WorldIdClient::from_config(&config)?;
        let recorder = VerificationRecorder::new(client.app_id(), store);
        let rules = ValidationRules::from_config(&config);
        let rate_limiter = Arc::new(RateLimiter::with_max_tracked_keys(
            config.rate_limit_max_tracked_keys,
        ));

        Ok(Self {
            config,
            client,
            recorder,
            rate_limiter,
            rules,
        })
    }
}

/// All routes served by the relay
pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let verify = warp::path!("api" / "verify-worldid")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::addr::remote())
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::body::content_length_limit(state.config.max_body_bytes))
        .and(warp::body::bytes())
        .and_then(handle_verify);

    // Answers every other method before the body is read
    let wrong_method = warp::path!("api" / "verify-worldid")
        .and(warp::method())
        .and_then(reject_non_post);

    health.or(verify).or(wrong_method).recover(handle_rejection)
}

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_verify(
    state: Arc<AppState>,
    remote: Option<SocketAddr>,
    forwarded_for: Option<String>,
    body: Bytes,
) -> std::result::Result<Response, Rejection> {
    let client_key = client_key(remote, forwarded_for.as_deref(), state.config.trust_forwarded_for);

    let reply = match process_verification(&state, &client_key, &body).await {
        Ok(VerificationOutcome::Verified { record }) => success_reply(&record),
        Ok(VerificationOutcome::Rejected { reason, code }) => error_reply(
            &VerifierError::UpstreamRejected {
                message: reason,
                code,
            },
            state.config.is_development(),
        ),
        Err(e) => error_reply(&e, state.config.is_development()),
    };

    Ok(reply)
}

/// Run one request through rate limiting, validation, the upstream check
/// and recording. Each stage short-circuits on failure.
pub async fn process_verification(
    state: &AppState,
    client_key: &str,
    body: &[u8],
) -> std::result::Result<VerificationOutcome, VerifierError> {
    if state.config.rate_limit_enabled
        && !state.rate_limiter.allow(
            client_key,
            state.config.rate_limit_max_requests,
            state.config.rate_limit_window(),
        )
    {
        return Err(VerifierError::RateLimited(client_key.to_string()));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| VerifierError::InvalidPayload(format!("body is not valid JSON: {}", e)))?;

    let request = validate_payload(&payload, &state.rules)?;

    match state.client.verify(&request).await? {
        verdict @ UpstreamVerdict::Verified { .. } => {
            let record = state.recorder.record(&verdict).await?;
            Ok(VerificationOutcome::Verified { record })
        }
        UpstreamVerdict::Rejected { reason, code } => {
            Ok(VerificationOutcome::Rejected { reason, code })
        }
    }
}

async fn reject_non_post(method: Method) -> std::result::Result<Response, Rejection> {
    if method == Method::POST {
        return Err(warp::reject::not_found());
    }
    Ok(error_reply(&VerifierError::MethodNotAllowed(method.to_string()), false))
}

fn client_key(remote: Option<SocketAddr>, forwarded_for: Option<&str>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let first_hop = forwarded_for
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        if let Some(hop) = first_hop {
            return hop.to_string();
        }
    }

    remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// First characters of the nullifier hash followed by `...`
pub fn truncate_nullifier(nullifier_hash: &str) -> String {
    let preview: String = nullifier_hash.chars().take(NULLIFIER_PREVIEW_CHARS).collect();
    format!("{}...", preview)
}

fn success_reply(record: &VerificationRecord) -> Response {
    info!(
        verification_id = %record.verification_id,
        action = %record.action,
        "Verification succeeded"
    );

    let body = SuccessBody {
        success: true,
        message: SUCCESS_MESSAGE.to_string(),
        verification_id: record.verification_id.clone(),
        timestamp: format_timestamp(&record.timestamp),
        verification_level: record.verification_level,
        data: SuccessData {
            verified: true,
            unique_human: true,
            nullifier_hash: truncate_nullifier(&record.nullifier_hash),
        },
    };

    warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response()
}

fn error_reply(err: &VerifierError, expose_detail: bool) -> Response {
    let status = err.status_code();

    if status.is_server_error() {
        error!("Verification request failed: {}", err);
    } else {
        warn!("Verification request refused: {}", err);
    }

    let body = match err {
        VerifierError::UpstreamRejected { message, code } => ErrorBody {
            error_code: Some(code.clone()),
            ..ErrorBody::new(message.clone())
        },
        VerifierError::RateLimited(_) => ErrorBody::new(RATE_LIMITED_MESSAGE),
        VerifierError::MethodNotAllowed(_) => ErrorBody::new(METHOD_NOT_ALLOWED_MESSAGE),
        e if e.is_server_error() => ErrorBody {
            error: expose_detail.then(|| e.to_string()),
            ..ErrorBody::new(INTERNAL_ERROR_MESSAGE)
        },
        e => ErrorBody::new(e.to_string()),
    };

    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length header required")
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
    };

    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody::new(message)), status).into_response())
}
