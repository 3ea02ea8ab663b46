//! Bearer-token validation.
//!
//! Tokens are issued by the external account service as HS256 JWTs. The
//! servers only validate: signature, algorithm, and expiry. The
//! [`TokenVerifier`] trait is the seam both servers authenticate through;
//! tests swap in their own issuer via [`issue`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use mangahub_types::SessionError;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque user id, the only field the sync core consumes structurally.
    pub user_id: String,
    /// Display name, used for logging.
    #[serde(default)]
    pub username: String,
    /// Unix expiry timestamp. Zero means no expiry.
    #[serde(default)]
    pub exp: i64,
}

/// Token validation faults.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token was not three base64url segments of JSON.
    #[error("malformed token")]
    Malformed,
    /// The header named an algorithm other than HS256.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// The signature did not verify.
    #[error("signature mismatch")]
    BadSignature,
    /// `exp` is in the past.
    #[error("token expired")]
    Expired,
}

impl From<AuthError> for SessionError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired => SessionError::TokenExpired,
            _ => SessionError::TokenInvalid,
        }
    }
}

/// Validates bearer tokens.
pub trait TokenVerifier: Send + Sync {
    /// Verify a token and return its claims.
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// HS256 JWT validator.
pub struct JwtHs256 {
    secret: Vec<u8>,
}

impl JwtHs256 {
    /// Create a validator over the shared secret.
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }
}

impl TokenVerifier for JwtHs256 {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(AuthError::Malformed),
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| AuthError::Malformed)?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| AuthError::Malformed)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::Malformed)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::Malformed)?;

        if claims.exp != 0 && claims.exp < Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

/// Issue a signed token for the given claims. The account service owns
/// issuance in production; this exists for the companion CLI's local login
/// flow and for tests.
pub fn issue(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).map_err(|_| AuthError::Malformed)?);

    let signing_input = format!("{header}.{body}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::Malformed)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}
