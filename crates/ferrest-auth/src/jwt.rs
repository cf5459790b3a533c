//! # HMAC JSON Web Tokens
//!
//! Compact JWS with an HMAC signature. Claim names follow Django
//! simple-jwt (`user_id`, `exp`, `token_type`, `jti`) so tokens issued by
//! either side are interchangeable.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ferrest_core::IdentityId;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{AuthError, TokenError};

/// Signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }
}

impl FromStr for Algorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminates access from refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        })
    }
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "user_id")]
    pub identity_id: IdentityId,
    /// Expiry, seconds since the epoch.
    #[serde(rename = "exp", deserialize_with = "epoch_seconds")]
    pub expires_at: i64,
    #[serde(rename = "token_type")]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

// Tokens minted by Python services carry a fractional `exp`.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = serde_json::Number::deserialize(deserializer)?;
    n.as_i64()
        .or_else(|| n.as_f64().map(|f| f.floor() as i64))
        .ok_or_else(|| serde::de::Error::custom("exp is not a finite number"))
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Signs and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct JwtCodec {
    algorithm: Algorithm,
    secret: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.algorithm)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtCodec {
    pub fn new(algorithm: Algorithm, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header {
            alg: self.algorithm.as_str().to_string(),
            typ: Some("JWT".to_string()),
        };
        let header = serde_json::to_vec(&header).map_err(|e| AuthError::Internal(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Internal(e.to_string()))?;

        let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(payload));
        let signature = self.sign(signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify signature, algorithm and expiry against `now` (epoch seconds).
    pub fn decode_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed.into());
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != self.algorithm.as_str() {
            return Err(TokenError::AlgorithmMismatch {
                expected: self.algorithm.as_str().to_string(),
                found: header.alg,
            }
            .into());
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signing_input_len = header_b64.len() + 1 + payload_b64.len();
        let expected = self.sign(&token.as_bytes()[..signing_input_len])?;
        if !bool::from(expected.ct_eq(&signature)) {
            return Err(TokenError::BadSignature.into());
        }

        let claims: Claims = decode_segment(payload_b64)?;
        if claims.expires_at <= now {
            return Err(TokenError::Expired.into());
        }
        Ok(claims)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_at(token, chrono::Utc::now().timestamp())
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, AuthError> {
        let key = self.secret.as_slice();
        let invalid_key = |e: hmac::digest::InvalidLength| AuthError::Internal(format!("hmac key: {e}"));
        Ok(match self.algorithm {
            Algorithm::HS256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::HS384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::HS512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
