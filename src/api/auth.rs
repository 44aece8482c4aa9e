use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::handler::AppState;
use crate::error::AppError;

pub const CRON_TOKEN_HEADER: &str = "x-cron-token";

/// Shared secret for scheduler and internal callers.
///
/// Only the SHA-256 digest is kept. Comparison runs over the full digest.
#[derive(Clone)]
pub struct CronToken {
    digest: Option<[u8; 32]>,
}

impl CronToken {
    pub fn new(token: &str) -> Self {
        let token = token.trim();
        Self {
            digest: (!token.is_empty()).then(|| digest(token)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    pub fn verify(&self, presented: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let presented = digest(presented.trim());
        expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Rejects requests without a valid `X-Cron-Token` header
pub async fn require_cron_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(CRON_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.cron_token.verify(presented) {
        warn!("Rejected unauthenticated request to {}", req.uri().path());
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(req).await)
}
