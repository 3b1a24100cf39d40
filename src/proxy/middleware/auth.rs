//! Bearer token gate for protected routes
//!
//! Every protected request must carry `Authorization: Bearer <jwt>`. The token is
//! verified against the shared secret (HS256); on success its claim set becomes the
//! request's [`Principal`], stored in the request extensions for handlers to echo
//! back. Nothing is cached between requests.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::proxy::config::AuthConfig;
use crate::proxy::error::ApiError;
use crate::proxy::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid authorization code")]
    MissingCredentials,
    #[error("Invalid authentication scheme")]
    InvalidScheme,
    #[error("Invalid or expired token")]
    InvalidToken,
}

impl AuthError {
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingCredentials => "Invalid authorization code",
            Self::InvalidScheme => "Invalid authentication scheme",
            Self::InvalidToken => "Invalid or expired token",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Forbidden(err.message())
    }
}

/// Decoded claims of the caller's bearer token, valid for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Principal {
    claims: Map<String, Value>,
}

impl Principal {
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }
}

pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret_key: &str, config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);

        validation.validate_exp = config.verify_exp;
        if !config.verify_exp {
            validation.required_spec_claims.clear();
        }

        validation.validate_aud = config.verify_aud;
        if config.verify_aud && !config.audience.is_empty() {
            validation.set_audience(&config.audience);
        }

        if config.verify_iss && !config.issuer.is_empty() {
            validation.set_issuer(&config.issuer);
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret_key.as_bytes()),
            validation,
        }
    }

    /// Split `<scheme> <credentials>` and require the bearer scheme
    pub fn extract_bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
        let raw = header_value.ok_or(AuthError::MissingCredentials)?;
        let (scheme, credentials) = raw.split_once(' ').unwrap_or((raw, ""));
        if scheme.is_empty() || credentials.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidScheme);
        }
        Ok(credentials)
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map(|data| Principal {
                claims: data.claims,
            })
            .map_err(|e| {
                tracing::debug!("bearer token rejected: {}", e);
                AuthError::InvalidToken
            })
    }

    pub fn authenticate(&self, header_value: Option<&str>) -> Result<Principal, AuthError> {
        let token = Self::extract_bearer_token(header_value)?;
        self.verify(token)
    }
}

/// Rejects unauthenticated requests with 403, otherwise attaches the [`Principal`]
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.authenticator.authenticate(header_value) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(
                "auth_middleware: rejecting {} {}: {}",
                request.method(),
                request.uri().path(),
                err
            );
            ApiError::from(err).into_response()
        }
    }
}
