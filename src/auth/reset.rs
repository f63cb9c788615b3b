use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Reset codes are valid for ten minutes.
pub const RESET_CODE_TTL: Duration = Duration::minutes(10);

/// A freshly minted password-reset code. `plaintext` goes out by email once;
/// only `hash` and `expires_at` are persisted.
#[derive(Debug, Clone)]
pub struct ResetCode {
    pub plaintext: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

impl ResetCode {
    pub fn issue() -> Self {
        Self::issue_at(OffsetDateTime::now_utc())
    }

    pub fn issue_at(now: OffsetDateTime) -> Self {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let plaintext = hex::encode(raw);
        let hash = Self::digest(&plaintext);
        Self {
            plaintext,
            hash,
            expires_at: now + RESET_CODE_TTL,
        }
    }

    /// SHA-256 hex digest used as the lookup key.
    pub fn digest(plaintext: &str) -> String {
        hex::encode(Sha256::digest(plaintext.as_bytes()))
    }
}

/// Whether a stored code (hash + expiry) accepts the presented plaintext at `now`.
pub fn accepts(
    stored_hash: Option<&str>,
    expires_at: Option<OffsetDateTime>,
    presented: &str,
    now: OffsetDateTime,
) -> bool {
    match (stored_hash, expires_at) {
        (Some(hash), Some(expires)) => hash == ResetCode::digest(presented) && expires > now,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_digest_is_kept() {
        let code = ResetCode::issue();
        assert_eq!(code.plaintext.len(), 64);
        assert_ne!(code.plaintext, code.hash);
        assert_eq!(ResetCode::digest(&code.plaintext), code.hash);
    }

    #[test]
    fn codes_are_random() {
        assert_ne!(ResetCode::issue().plaintext, ResetCode::issue().plaintext);
    }

    #[test]
    fn expires_after_ten_minutes() {
        let now = OffsetDateTime::now_utc();
        let code = ResetCode::issue_at(now);
        assert_eq!(code.expires_at - now, Duration::minutes(10));

        let stored = Some(code.hash.as_str());
        assert!(accepts(stored, Some(code.expires_at), &code.plaintext, now));
        assert!(accepts(
            stored,
            Some(code.expires_at),
            &code.plaintext,
            now + Duration::minutes(9)
        ));
        assert!(!accepts(
            stored,
            Some(code.expires_at),
            &code.plaintext,
            now + Duration::minutes(10)
        ));
    }

    #[test]
    fn wrong_or_cleared_code_never_matches() {
        let now = OffsetDateTime::now_utc();
        let code = ResetCode::issue_at(now);
        assert!(!accepts(Some(&code.hash), Some(code.expires_at), "guess", now));
        assert!(!accepts(None, None, &code.plaintext, now));
        assert!(!accepts(Some(&code.hash), None, &code.plaintext, now));
    }
}
