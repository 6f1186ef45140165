// ============================
// supportchat-backend-lib/src/auth/session.rs
// ============================
//! Session cookie handling: turns an inbound request into an anonymous identity.
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, Uri};
use chrono::{DateTime, Duration, Utc};
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::Cookie;
use metrics::counter;
use tracing::debug;
use uuid::Uuid;

use super::token::TokenCodec;
use crate::config::SessionSettings;
use crate::error::AppError;
use crate::metrics::{SESSION_MINTED, SESSION_RESUMED};

/// Lifetime of the support marker cookie handed out by the operator endpoint
pub const SUPPORT_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Who is calling: threaded explicitly into every RPC handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque per-browser session id
    pub session_id: String,
    /// Support capability, granted by the unsigned marker cookie
    pub support: bool,
}

impl Identity {
    pub fn new(session_id: impl Into<String>, support: bool) -> Self {
        Self {
            session_id: session_id.into(),
            support,
        }
    }
}

/// Outcome of a handshake: the caller's identity plus the refreshed cookie
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub identity: Identity,
    /// Fresh `Set-Cookie` value; always emitted so the session slides forward
    pub set_cookie: HeaderValue,
    /// Whether the identity was recovered from a valid token
    pub resumed: bool,
}

/// Reads and re-issues the signed session cookie
pub struct SessionResolver {
    codec: Arc<TokenCodec>,
    settings: SessionSettings,
    ttl: Duration,
}

impl SessionResolver {
    pub fn new(codec: Arc<TokenCodec>, settings: SessionSettings) -> Self {
        let ttl = Duration::seconds(i64::try_from(settings.ttl_secs).unwrap_or(i64::MAX / 1000));
        Self {
            codec,
            settings,
            ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Resolve the caller of an inbound request
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<ResolvedSession, AppError> {
        self.resolve_at(headers, uri, Utc::now())
    }

    /// Resolve the caller as of `now`. Token problems never surface: an
    /// invalid or expired token just yields a brand new session id.
    pub fn resolve_at(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSession, AppError> {
        let previous = cookie_value(headers, &self.settings.cookie_name).and_then(|token| {
            self.codec
                .verify_at(&token, now)
                .map_err(|err| debug!(error = %err, "discarding invalid session token"))
                .ok()
        });

        let resumed = previous.is_some();
        let session_id = previous.unwrap_or_else(new_session_id);
        if resumed {
            counter!(SESSION_RESUMED).increment(1);
        } else {
            counter!(SESSION_MINTED).increment(1);
        }

        let expires_at = now + self.ttl;
        let token = self
            .codec
            .issue(&session_id, now, expires_at)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let set_cookie = self.session_cookie(&token, expires_at, self.is_secure(headers, uri))?;
        let support = cookie_value(headers, &self.settings.support_cookie_name).is_some();

        Ok(ResolvedSession {
            identity: Identity {
                session_id,
                support,
            },
            set_cookie,
            resumed,
        })
    }

    fn session_cookie(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        secure: bool,
    ) -> Result<HeaderValue, AppError> {
        let cookie = Cookie::build((self.settings.cookie_name.as_str(), token))
            .path(self.settings.cookie_path.as_str())
            .http_only(true)
            .same_site(self.settings.same_site.into())
            .secure(secure)
            .max_age(CookieDuration::seconds(self.ttl.num_seconds()))
            .expires(offset_date_time(expires_at)?)
            .build();

        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| AppError::Internal(format!("invalid session cookie: {e}")))
    }

    /// Marker cookie granting the support capability to this browser
    pub fn support_cookie(&self, now: DateTime<Utc>) -> Result<HeaderValue, AppError> {
        let expires_at = now + Duration::seconds(SUPPORT_COOKIE_MAX_AGE_SECS);
        let cookie = Cookie::build((self.settings.support_cookie_name.as_str(), "true"))
            .path(self.settings.cookie_path.as_str())
            .http_only(true)
            .same_site(cookie::SameSite::Strict)
            .max_age(CookieDuration::seconds(SUPPORT_COOKIE_MAX_AGE_SECS))
            .expires(offset_date_time(expires_at)?)
            .build();

        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| AppError::Internal(format!("invalid support cookie: {e}")))
    }

    fn is_secure(&self, headers: &HeaderMap, uri: &Uri) -> bool {
        self.settings.secure.unwrap_or_else(|| {
            let forwarded_https = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
            forwarded_https || uri.scheme_str() == Some("https")
        })
    }
}

/// Fresh session id: 128 random bits as 32 lowercase hex characters
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// First value of cookie `name` across all `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_string())
}

fn offset_date_time(at: DateTime<Utc>) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| AppError::Internal(format!("cookie expiry out of range: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;
    use ed25519_dalek::SigningKey;

    fn resolver() -> SessionResolver {
        let codec = Arc::new(TokenCodec::new(SigningKey::from_bytes(&[11u8; 32])));
        SessionResolver::new(codec, SessionSettings::default())
    }

    fn uri() -> Uri {
        Uri::from_static("/chat/ws")
    }

    fn with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    fn token_from(set_cookie: &HeaderValue) -> String {
        let cookie = Cookie::parse(set_cookie.to_str().unwrap()).unwrap();
        cookie.value().to_string()
    }

    #[test]
    fn test_first_contact_mints_a_session() {
        let resolver = resolver();
        let resolved = resolver.resolve(&HeaderMap::new(), &uri()).unwrap();

        assert!(!resolved.resumed);
        assert!(!resolved.identity.support);
        assert_eq!(resolved.identity.session_id.len(), 32);
        assert!(resolved
            .identity
            .session_id
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let cookie = resolved.set_cookie.to_str().unwrap();
        assert!(cookie.starts_with("chat_session=v4.public."));
        assert!(cookie.contains("Path=/chat"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_valid_cookie_is_reused_and_refreshed() {
        let resolver = resolver();
        let first = resolver.resolve(&HeaderMap::new(), &uri()).unwrap();
        let token = token_from(&first.set_cookie);

        let later = Utc::now() + Duration::minutes(90);
        let second = resolver
            .resolve_at(&with_cookie(&format!("chat_session={token}")), &uri(), later)
            .unwrap();

        assert!(second.resumed);
        assert_eq!(second.identity.session_id, first.identity.session_id);
        // A new token is always issued, extending the window
        assert_ne!(token_from(&second.set_cookie), token);
    }

    #[test]
    fn test_expired_cookie_yields_new_session() {
        let resolver = resolver();
        let first = resolver.resolve(&HeaderMap::new(), &uri()).unwrap();
        let token = token_from(&first.set_cookie);

        let expired = Utc::now() + Duration::hours(3);
        let second = resolver
            .resolve_at(&with_cookie(&format!("chat_session={token}")), &uri(), expired)
            .unwrap();

        assert!(!second.resumed);
        assert_ne!(second.identity.session_id, first.identity.session_id);
    }

    #[test]
    fn test_tampered_or_foreign_cookie_yields_new_session() {
        let resolver = resolver();
        let first = resolver.resolve(&HeaderMap::new(), &uri()).unwrap();
        let mut token = token_from(&first.set_cookie);
        let last = token.pop().unwrap();
        token.push(if last == 'A' { 'B' } else { 'A' });

        let second = resolver
            .resolve(&with_cookie(&format!("chat_session={token}")), &uri())
            .unwrap();
        assert!(!second.resumed);
        assert_ne!(second.identity.session_id, first.identity.session_id);

        let other = SessionResolver::new(
            Arc::new(TokenCodec::new(SigningKey::from_bytes(&[12u8; 32]))),
            SessionSettings::default(),
        );
        let foreign = other.resolve(&HeaderMap::new(), &uri()).unwrap();
        let third = resolver
            .resolve(
                &with_cookie(&format!("chat_session={}", token_from(&foreign.set_cookie))),
                &uri(),
            )
            .unwrap();
        assert!(!third.resumed);
    }

    #[test]
    fn test_support_cookie_sets_capability() {
        let resolver = resolver();
        let resolved = resolver
            .resolve(&with_cookie("theme=dark; chat_support=true"), &uri())
            .unwrap();
        assert!(resolved.identity.support);
    }

    #[test]
    fn test_secure_attribute_follows_origin() {
        let resolver = resolver();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let resolved = resolver.resolve(&headers, &uri()).unwrap();
        assert!(resolved.set_cookie.to_str().unwrap().contains("; Secure"));

        let https = Uri::from_static("https://example.com/chat/ws");
        let resolved = resolver.resolve(&HeaderMap::new(), &https).unwrap();
        assert!(resolved.set_cookie.to_str().unwrap().contains("Secure"));

        let mut settings = SessionSettings::default();
        settings.secure = Some(false);
        settings.same_site = SameSite::Strict;
        let forced = SessionResolver::new(resolver.codec.clone(), settings);
        let resolved = forced.resolve(&headers, &uri()).unwrap();
        let cookie = resolved.set_cookie.to_str().unwrap();
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = with_cookie("a=1; chat_session=\"tok\"");
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));
        assert_eq!(cookie_value(&headers, "chat_session").as_deref(), Some("tok"));
        assert_eq!(cookie_value(&headers, "b").as_deref(), Some("2"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_support_cookie_attributes() {
        let cookie = resolver().support_cookie(Utc::now()).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("chat_support=true"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(cookie.contains("Path=/chat"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_session_cookie_expires_with_token() {
        let now = DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let resolved = resolver().resolve_at(&HeaderMap::new(), &uri(), now).unwrap();
        let cookie = Cookie::parse(resolved.set_cookie.to_str().unwrap().to_string()).unwrap();

        assert_eq!(cookie.name(), "chat_session");
        assert_eq!(cookie.max_age(), Some(CookieDuration::hours(2)));
        assert_eq!(
            cookie.expires_datetime().map(|at| at.unix_timestamp()),
            Some((now + Duration::hours(2)).timestamp())
        );
    }
}
