// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
//! Signed identity tokens.
//!
//! Tokens are PASETO `v4.public`: the claims travel in the clear and are
//! signed with Ed25519. Only the holder of the secret key can mint a token,
//! while the public half is enough to check one.
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::SigningKey;
use rusty_paseto::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroize;

/// Token header for the public (signed, not encrypted) v4 purpose
pub const HEADER: &str = "v4.public.";
/// Fixed issuer embedded in every token
pub const ISSUER: &str = "supportchat";
/// Fixed audience embedded in every token
pub const AUDIENCE: &str = "user";

/// Why a token was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Bad format or signature, foreign issuer or audience, or outside its
    /// window by the wall clock
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("malformed claims: {0}")]
    Malformed(String),
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token has no subject")]
    MissingSubject,
    #[error("failed to build token: {0}")]
    Encoding(String),
}

/// Why a configured secret could not become a signing key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("secret is not valid base64")]
    Base64,
    #[error("secret decodes to {0} bytes, expected 32 or 64")]
    Length(usize),
    #[error("secret key does not match its embedded public key")]
    PublicKeyMismatch,
}

#[derive(Deserialize, Debug)]
struct Claims {
    #[serde(default)]
    sub: String,
    nbf: DateTime<Utc>,
    exp: DateTime<Utc>,
}

/// Issues and verifies identity tokens with a process-wide key
pub struct TokenCodec {
    /// Seed followed by the public key
    private_key: Key<64>,
    public_key: Key<32>,
    ephemeral: bool,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key()))
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn encoding_error(err: impl std::fmt::Display) -> TokenError {
    TokenError::Encoding(err.to_string())
}

impl TokenCodec {
    pub fn new(signing_key: SigningKey) -> Self {
        let mut keypair = signing_key.to_keypair_bytes();
        let private_key = Key::<64>::from(&keypair);
        keypair.zeroize();

        Self {
            private_key,
            public_key: Key::<32>::from(signing_key.verifying_key().as_bytes()),
            ephemeral: false,
        }
    }

    /// Codec with a random key that lives only as long as the process
    pub fn generate() -> Self {
        let mut seed: [u8; 32] = rand::random();
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        let mut codec = Self::new(signing_key);
        codec.ephemeral = true;
        codec
    }

    /// Decode a base64 secret holding either a 32 byte seed or a 64 byte
    /// secret key (seed followed by the public key)
    pub fn try_from_secret(secret: &str) -> Result<Self, KeyError> {
        let mut decoded = STANDARD.decode(secret.trim()).map_err(|_| KeyError::Base64)?;
        let result = Self::from_key_bytes(&decoded);
        decoded.zeroize();
        result
    }

    fn from_key_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let mut seed = [0u8; 32];
        match bytes.len() {
            32 => seed.copy_from_slice(bytes),
            64 => seed.copy_from_slice(&bytes[..32]),
            other => return Err(KeyError::Length(other)),
        }
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        if bytes.len() == 64 && signing_key.verifying_key().as_bytes()[..] != bytes[32..] {
            return Err(KeyError::PublicKeyMismatch);
        }

        Ok(Self::new(signing_key))
    }

    /// Build the codec from the configured secret. A missing or undecodable
    /// secret degrades to an ephemeral key instead of aborting start-up.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.trim().is_empty()) {
            Some(secret) => match Self::try_from_secret(secret) {
                Ok(codec) => {
                    info!("loaded session signing key");
                    codec
                },
                Err(err) => {
                    warn!(error = %err, "failed to decode session signing key, using a random key; sessions will not survive a restart");
                    Self::generate()
                },
            },
            None => {
                warn!("no session signing key configured, using a random key; sessions will not survive a restart");
                Self::generate()
            },
        }
    }

    /// Whether tokens minted by this codec become invalid on restart
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    /// Mint a token for `subject`, valid from `issued_at` until `expires_at`
    pub fn issue(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let issued = rfc3339(issued_at);
        let expires = rfc3339(expires_at);

        let key = PasetoAsymmetricPrivateKey::<V4, Public>::from(self.private_key.as_slice());
        PasetoBuilder::<V4, Public>::default()
            .set_claim(IssuerClaim::from(ISSUER))
            .set_claim(AudienceClaim::from(AUDIENCE))
            .set_claim(SubjectClaim::from(subject))
            .set_claim(IssuedAtClaim::try_from(issued.as_str()).map_err(encoding_error)?)
            .set_claim(NotBeforeClaim::try_from(issued.as_str()).map_err(encoding_error)?)
            .set_claim(ExpirationClaim::try_from(expires.as_str()).map_err(encoding_error)?)
            .build(&key)
            .map_err(encoding_error)
    }

    /// Verify `token` against the current time and return its subject
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as of `now` and return its subject. The parser checks
    /// signature, issuer, audience and the wall clock window; the window is
    /// then checked again against `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let key = PasetoAsymmetricPublicKey::<V4, Public>::from(&self.public_key);
        let payload = PasetoParser::<V4, Public>::default()
            .check_claim(IssuerClaim::from(ISSUER))
            .check_claim(AudienceClaim::from(AUDIENCE))
            .parse(token, &key)
            .map_err(|e| TokenError::Rejected(e.to_string()))?;

        let claims: Claims =
            serde_json::from_value(payload).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.sub.is_empty() {
            return Err(TokenError::MissingSubject);
        }

        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> TokenCodec {
        TokenCodec::new(SigningKey::from_bytes(&[7u8; 32]))
    }

    /// Sign arbitrary claims with the codec's key, bypassing `issue`
    fn forge(codec: &TokenCodec, issuer: &str, audience: &str, subject: Option<&str>) -> String {
        let now = Utc::now();
        let issued = rfc3339(now);
        let expires = rfc3339(now + Duration::hours(1));
        let key = PasetoAsymmetricPrivateKey::<V4, Public>::from(codec.private_key.as_slice());

        let mut builder = PasetoBuilder::<V4, Public>::default();
        builder
            .set_claim(IssuerClaim::from(issuer))
            .set_claim(AudienceClaim::from(audience))
            .set_claim(NotBeforeClaim::try_from(issued.as_str()).unwrap())
            .set_claim(ExpirationClaim::try_from(expires.as_str()).unwrap());
        if let Some(subject) = subject {
            builder.set_claim(SubjectClaim::from(subject));
        }
        builder.build(&key).unwrap()
    }

    #[test]
    fn test_issue_then_verify_recovers_subject() {
        let codec = codec();
        let now = Utc::now();
        let token = codec.issue("abc123", now, now + Duration::hours(2)).unwrap();

        assert!(token.starts_with(HEADER));
        assert_eq!(codec.verify(&token).unwrap(), "abc123");
        assert_eq!(
            codec.verify_at(&token, now + Duration::minutes(119)).unwrap(),
            "abc123"
        );
    }

    #[test]
    fn test_expiry_and_not_before_bounds() {
        let codec = codec();
        let now = Utc::now();
        let token = codec.issue("abc", now, now + Duration::hours(2)).unwrap();

        assert_eq!(
            codec.verify_at(&token, now + Duration::hours(2)),
            Err(TokenError::Expired)
        );
        assert_eq!(
            codec.verify_at(&token, now - Duration::seconds(1)),
            Err(TokenError::NotYetValid)
        );
    }

    #[test]
    fn test_token_past_wall_clock_expiry_is_rejected() {
        let codec = codec();
        let issued = Utc::now() - Duration::hours(3);
        let token = codec.issue("abc", issued, issued + Duration::hours(2)).unwrap();
        assert!(codec.verify(&token).is_err());
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let codec = codec();
        let now = Utc::now();
        let token = codec.issue("abc", now, now + Duration::hours(2)).unwrap();

        let mut payload = URL_SAFE_NO_PAD.decode(&token[HEADER.len()..]).unwrap();
        // Flip a bit inside the claims
        payload[5] ^= 0x01;
        let tampered = format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(payload));
        assert!(matches!(codec.verify(&tampered), Err(TokenError::Rejected(_))));
    }

    #[test]
    fn test_token_from_another_key_is_rejected() {
        let now = Utc::now();
        let token = codec().issue("abc", now, now + Duration::hours(2)).unwrap();
        let other = TokenCodec::new(SigningKey::from_bytes(&[9u8; 32]));
        assert!(matches!(other.verify(&token), Err(TokenError::Rejected(_))));
    }

    #[test]
    fn test_wrong_issuer_audience_and_missing_subject() {
        let codec = codec();

        let token = forge(&codec, "someone-else", AUDIENCE, Some("abc"));
        assert!(matches!(codec.verify(&token), Err(TokenError::Rejected(_))));

        let token = forge(&codec, ISSUER, "admin", Some("abc"));
        assert!(matches!(codec.verify(&token), Err(TokenError::Rejected(_))));

        let token = forge(&codec, ISSUER, AUDIENCE, None);
        assert_eq!(codec.verify(&token), Err(TokenError::MissingSubject));

        let token = forge(&codec, ISSUER, AUDIENCE, Some("abc"));
        assert_eq!(codec.verify(&token).unwrap(), "abc");
    }

    #[test]
    fn test_garbage_tokens_are_rejected() {
        let codec = codec();
        for token in ["", "garbage", "v4.local.abc", "v4.public.!!!", "v4.public.AAAA"] {
            assert!(
                matches!(codec.verify(token), Err(TokenError::Rejected(_))),
                "{token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_secret_decoding() {
        let seed = [3u8; 32];
        let codec = TokenCodec::try_from_secret(&STANDARD.encode(seed)).unwrap();
        assert!(!codec.is_ephemeral());

        // 64 byte PASETO style secret: seed followed by the public key
        let mut full = seed.to_vec();
        full.extend_from_slice(codec.public_key());
        let same = TokenCodec::try_from_secret(&STANDARD.encode(&full)).unwrap();
        assert_eq!(same.public_key(), codec.public_key());

        full[40] ^= 0xff;
        assert_eq!(
            TokenCodec::try_from_secret(&STANDARD.encode(&full)).unwrap_err(),
            KeyError::PublicKeyMismatch
        );
        assert_eq!(
            TokenCodec::try_from_secret("not base64!").unwrap_err(),
            KeyError::Base64
        );
        assert_eq!(
            TokenCodec::try_from_secret(&STANDARD.encode([1u8; 10])).unwrap_err(),
            KeyError::Length(10)
        );
    }

    #[test]
    fn test_bad_secret_falls_back_to_ephemeral_key() {
        assert!(TokenCodec::from_secret(Some("%%%")).is_ephemeral());
        assert!(TokenCodec::from_secret(None).is_ephemeral());
        assert!(TokenCodec::from_secret(Some("   ")).is_ephemeral());

        let stable = STANDARD.encode([5u8; 32]);
        let a = TokenCodec::from_secret(Some(&stable));
        let b = TokenCodec::from_secret(Some(&stable));
        assert!(!a.is_ephemeral());

        // Same secret, same key: tokens survive a restart
        let now = Utc::now();
        let token = a.issue("sid", now, now + Duration::hours(2)).unwrap();
        assert_eq!(b.verify(&token).unwrap(), "sid");
    }
}
