//! # Password Hashes
//!
//! Stored hashes use Django's encodings so an existing `auth_user` table can
//! be served without rehashing:
//!
//! ```text
//! pbkdf2_sha256$<iterations>$<salt>$<base64 digest>
//! argon2$argon2id$v=19$m=..,t=..,p=..$<salt>$<hash>
//! bcrypt$$2b$<cost>$<salt+hash>
//! bcrypt_sha256$$2b$<cost>$<salt+hash>
//! ```
//!
//! New hashes are always `pbkdf2_sha256`. Verification never errors: an
//! unknown scheme or malformed hash is simply a mismatch.
//!
//! Both operations are CPU-bound; async callers go through
//! [`PasswordHasher::hash_blocking`] and [`verify_blocking`], which run on
//! the blocking pool.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

pub const PBKDF2_SHA256: &str = "pbkdf2_sha256";

/// Iteration count Django 5.0 uses for new PBKDF2 hashes.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

const SALT_LEN: usize = 22;
const DIGEST_LEN: usize = 32;

/// Produces new `pbkdf2_sha256` hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn hash(&self, plaintext: &str) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        self.hash_with_salt(plaintext, &salt)
    }

    fn hash_with_salt(&self, plaintext: &str, salt: &str) -> String {
        let mut digest = [0u8; DIGEST_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt.as_bytes(), self.iterations, &mut digest);
        format!(
            "{PBKDF2_SHA256}${}${salt}${}",
            self.iterations,
            STANDARD.encode(digest)
        )
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_blocking(&self, plaintext: String) -> Result<String, AuthError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))
    }
}

/// Check a plaintext password against a stored hash.
pub fn verify(plaintext: &str, stored: &str) -> bool {
    let Some((scheme, rest)) = stored.split_once('$') else {
        return false;
    };
    match scheme {
        PBKDF2_SHA256 => verify_pbkdf2(plaintext, rest),
        "argon2" => verify_argon2(plaintext, rest),
        "bcrypt" => bcrypt::verify(plaintext, rest).unwrap_or(false),
        "bcrypt_sha256" => {
            let prehashed: String = Sha256::digest(plaintext.as_bytes())
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            bcrypt::verify(prehashed, rest).unwrap_or(false)
        }
        _ => false,
    }
}

/// [`verify`] on the blocking pool. A failed task counts as a mismatch.
pub async fn verify_blocking(plaintext: String, stored: String) -> bool {
    match tokio::task::spawn_blocking(move || verify(&plaintext, &stored)).await {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!(error = %e, "password verification task failed");
            false
        }
    }
}

fn verify_pbkdf2(plaintext: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(3, '$');
    let (Some(iterations), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Ok(expected) = STANDARD.decode(digest) else {
        return false;
    };
    if iterations == 0 || expected.is_empty() {
        return false;
    }

    let mut computed = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt.as_bytes(), iterations, &mut computed);
    computed.ct_eq(&expected).into()
}

fn verify_argon2(plaintext: &str, encoded: &str) -> bool {
    // Django drops the PHC string's leading '$' when it prepends the scheme.
    let phc = format!("${encoded}");
    match PasswordHash::new(&phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::SaltString;
    use argon2::PasswordHasher as _;

    const DJANGO_PBKDF2: &str = "pbkdf2_sha256$1000$saltsaltsalt$0CS180p2JyFVBlSauO9bqRHaQyKSs37sznJIllOe0S0=";

    #[test]
    fn verifies_django_pbkdf2() {
        assert!(verify("secret123", DJANGO_PBKDF2));
        assert!(!verify("secret124", DJANGO_PBKDF2));
    }

    #[test]
    fn verifies_django_argon2() {
        let salt = SaltString::from_b64("c29tZXNhbHRzb21lc2FsdA").unwrap();
        let phc = Argon2::default()
            .hash_password(b"secret123", &salt)
            .unwrap()
            .to_string();
        let stored = format!("argon2{phc}");
        assert!(stored.starts_with("argon2$argon2id$v=19$"));
        assert!(verify("secret123", &stored));
        assert!(!verify("wrong", &stored));
    }

    #[test]
    fn verifies_django_bcrypt() {
        let stored = format!("bcrypt${}", bcrypt::hash("secret123", 4).unwrap());
        assert!(verify("secret123", &stored));
        assert!(!verify("secret12", &stored));
    }

    #[test]
    fn verifies_django_bcrypt_sha256() {
        let prehashed: String = Sha256::digest(b"secret123").iter().map(|b| format!("{b:02x}")).collect();
        let stored = format!("bcrypt_sha256${}", bcrypt::hash(prehashed, 4).unwrap());
        assert!(verify("secret123", &stored));
        assert!(!verify("other", &stored));
    }

    #[test]
    fn malformed_hashes_never_match() {
        for stored in [
            "",
            "plaintext",
            "md5$abc$def",
            "pbkdf2_sha256$notanumber$salt$AAAA",
            "pbkdf2_sha256$0$salt$AAAA",
            "pbkdf2_sha256$1000$salt",
            "pbkdf2_sha256$1000$salt$***",
            "argon2$garbage",
            "bcrypt$$2b$xx",
        ] {
            assert!(!verify("secret123", stored), "{stored}");
        }
    }

    #[test]
    fn hash_uses_django_layout() {
        let hasher = PasswordHasher::new(1000);
        let stored = hasher.hash("hunter22");
        let parts: Vec<&str> = stored.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], PBKDF2_SHA256);
        assert_eq!(parts[1], "1000");
        assert_eq!(parts[2].len(), SALT_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(verify("hunter22", &stored));
    }

    #[test]
    fn known_salt_reproduces_django_digest() {
        assert_eq!(PasswordHasher::new(1000).hash_with_salt("secret123", "saltsaltsalt"), DJANGO_PBKDF2);
    }

    #[test]
    fn salts_are_fresh() {
        let hasher = PasswordHasher::new(1);
        assert_ne!(hasher.hash("same"), hasher.hash("same"));
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let hasher = PasswordHasher::new(1000);
        let stored = hasher.hash_blocking("pw-123456".into()).await.unwrap();
        assert!(verify_blocking("pw-123456".into(), stored.clone()).await);
        assert!(!verify_blocking("pw-654321".into(), stored).await);
    }
}
