use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{
    app_state::AppState,
    audit::{AuditActor, AuditContext, AuditStatus},
    error::{ApiResult, AppError},
    telemetry,
};

const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was turned away before reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingHeader,
    UnreadableHeader,
    NotBearer,
    UnknownToken,
}

impl Rejection {
    fn reason(self) -> &'static str {
        match self {
            Rejection::MissingHeader => "missing operator authorization header",
            Rejection::UnreadableHeader => "invalid operator authorization header",
            Rejection::NotBearer => "invalid operator authorization header scheme",
            Rejection::UnknownToken => "invalid operator token",
        }
    }

    fn into_error(self) -> AppError {
        match self {
            Rejection::UnknownToken => AppError::forbidden(self.reason()),
            _ => AppError::unauthorized(self.reason()),
        }
    }
}

/// Route layer guarding every `/api/v1` route. Rejections are audited; the
/// accepted caller is attached as an [`OperatorIdentity`] extension.
pub async fn require_operator_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> ApiResult<Response> {
    let auth = &state.operator_auth;
    let checked = bearer_token(req.headers(), &auth.header_name).and_then(|token| {
        if auth.is_token(token) {
            Ok(OperatorIdentity::from_token(token))
        } else {
            Err(Rejection::UnknownToken)
        }
    });

    match checked {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Err(rejection) => {
            let request_id = telemetry::request_id_from_request(&req);
            let target = format!("{} {}", req.method(), req.uri().path());
            audit_rejection(&state, request_id.as_deref(), &target, rejection).await;
            Err(rejection.into_error())
        }
    }
}

fn bearer_token<'h>(headers: &'h HeaderMap, header: &HeaderName) -> Result<&'h str, Rejection> {
    let raw = headers.get(header).ok_or(Rejection::MissingHeader)?;
    let text = raw.to_str().map_err(|_| Rejection::UnreadableHeader)?;
    text.strip_prefix(BEARER_PREFIX).ok_or(Rejection::NotBearer)
}

/// Authenticated operator, known only by a SHA-256 of the token.
#[derive(Clone, Debug)]
pub struct OperatorIdentity {
    pub token_hash: String,
}

impl OperatorIdentity {
    pub fn from_token(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        let token_hash = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        Self { token_hash }
    }

    pub fn to_audit_actor(&self) -> AuditActor {
        AuditActor {
            token_hash: Some(self.token_hash.clone()),
        }
    }
}

async fn audit_rejection(
    state: &AppState,
    request_id: Option<&str>,
    target: &str,
    rejection: Rejection,
) {
    telemetry::record_audit_log(
        state,
        "auth",
        "auth",
        AuditStatus::Failure,
        AuditContext {
            request_id,
            payload: Some(format!("{target}: {}", rejection.reason())),
            ..AuditContext::default()
        },
    )
    .await;
}
