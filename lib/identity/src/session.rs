//! Cookie-persisted sessions.
//!
//! A session lives entirely in the browser: the ticket (principal, tokens,
//! timestamps) is serialized and sealed with authenticated encryption before
//! it is written as a cookie. Nothing is kept server-side, so restoring a
//! ticket is the only way to learn who a request belongs to, and any cookie
//! that fails verification is treated as no session at all.

use crate::error::{SealError, SessionInvalid};
use crate::flow::{PENDING_LIFETIME, PendingAuthorization};
use crate::principal::Principal;
use crate::tokens::TokenBundle;
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, CookieJar, Key, SameSite};
use lantern_core::TicketId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "lantern.session";

/// Name of the cookie holding a pending authorization.
pub const PENDING_COOKIE_NAME: &str = "lantern.pending";

/// Browsers commonly drop cookies larger than this.
const MAX_COOKIE_BYTES: usize = 4096;

/// Everything a session cookie carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    id: TicketId,
    principal: Principal,
    tokens: TokenBundle,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionTicket {
    /// Issues a new ticket valid for `lifetime` from `now`.
    #[must_use]
    pub fn issue(
        principal: Principal,
        tokens: TokenBundle,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            principal,
            tokens,
            issued_at: now,
            expires_at: expiry(now, lifetime),
        }
    }

    #[must_use]
    pub fn id(&self) -> TicketId {
        self.id
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenBundle {
        &self.tokens
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Same session with renewed tokens and a fresh expiry.
    #[must_use]
    pub fn with_tokens(&self, tokens: TokenBundle, lifetime: Duration, now: DateTime<Utc>) -> Self {
        Self {
            tokens,
            expires_at: expiry(now, lifetime),
            ..self.clone()
        }
    }

    /// Same session with a fresh expiry.
    #[must_use]
    pub fn extended(&self, lifetime: Duration, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: expiry(now, lifetime),
            ..self.clone()
        }
    }
}

/// `now + lifetime`, saturating at the latest representable instant.
fn expiry(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    now.checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// What a request's session cookie turned out to be.
#[derive(Debug, Clone)]
pub enum SessionState {
    Restored(Box<SessionTicket>),
    Missing,
    Invalid(SessionInvalid),
}

impl SessionState {
    /// The restored ticket, if any.
    #[must_use]
    pub fn ticket(&self) -> Option<&SessionTicket> {
        match self {
            Self::Restored(ticket) => Some(ticket),
            Self::Missing | Self::Invalid(_) => None,
        }
    }
}

/// Seals session tickets into cookies and restores them.
#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    cookie_name: String,
    lifetime: Duration,
    secure: bool,
}

impl SessionStore {
    /// Creates a store with a one hour lifetime and secure cookies.
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            lifetime: Duration::hours(1),
            secure: true,
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Controls the `Secure` flag; only disable for plain-HTTP development.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issues a ticket for a fresh sign-in and seals it.
    ///
    /// # Errors
    ///
    /// Returns `SealError` if the ticket cannot be serialized.
    pub fn persist(
        &self,
        principal: Principal,
        tokens: TokenBundle,
    ) -> Result<(SessionTicket, Cookie<'static>), SealError> {
        let ticket = SessionTicket::issue(principal, tokens, self.lifetime, Utc::now());
        let cookie = self.persist_ticket(&ticket)?;
        Ok((ticket, cookie))
    }

    /// Seals an existing ticket, e.g. after renewal.
    ///
    /// # Errors
    ///
    /// Returns `SealError` if the ticket cannot be serialized.
    pub fn persist_ticket(&self, ticket: &SessionTicket) -> Result<Cookie<'static>, SealError> {
        let remaining = (ticket.expires_at() - Utc::now()).max(Duration::zero());
        self.seal(&self.cookie_name, ticket, remaining)
    }

    /// Restores a ticket from its cookie.
    ///
    /// # Errors
    ///
    /// Returns `SessionInvalid` when the cookie fails verification, does not
    /// hold a ticket, or holds an expired one.
    pub fn restore(&self, cookie: &Cookie<'_>) -> Result<SessionTicket, SessionInvalid> {
        self.restore_at(cookie, Utc::now())
    }

    /// Like [`restore`](Self::restore) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`restore`](Self::restore).
    pub fn restore_at(
        &self,
        cookie: &Cookie<'_>,
        now: DateTime<Utc>,
    ) -> Result<SessionTicket, SessionInvalid> {
        let ticket: SessionTicket = self.open(cookie)?;
        if ticket.is_expired_at(now) {
            return Err(SessionInvalid::Expired {
                expired_at: ticket.expires_at(),
            });
        }
        Ok(ticket)
    }

    /// Classifies an optional session cookie.
    #[must_use]
    pub fn inspect(&self, cookie: Option<&Cookie<'_>>) -> SessionState {
        match cookie {
            None => SessionState::Missing,
            Some(cookie) => match self.restore(cookie) {
                Ok(ticket) => SessionState::Restored(Box::new(ticket)),
                Err(invalid) => SessionState::Invalid(invalid),
            },
        }
    }

    /// Returns an extended ticket once more than half its lifetime has passed.
    #[must_use]
    pub fn slide(&self, ticket: &SessionTicket, now: DateTime<Utc>) -> Option<SessionTicket> {
        let remaining = ticket.expires_at() - now;
        if remaining < self.lifetime / 2 {
            Some(ticket.extended(self.lifetime, now))
        } else {
            None
        }
    }

    /// Cookie that deletes the session cookie.
    #[must_use]
    pub fn removal(&self) -> Cookie<'static> {
        removal_cookie(self.cookie_name.clone())
    }

    /// Seals a pending authorization for the callback.
    ///
    /// # Errors
    ///
    /// Returns `SealError` if the value cannot be serialized.
    pub fn seal_pending(&self, pending: &PendingAuthorization) -> Result<Cookie<'static>, SealError> {
        self.seal(PENDING_COOKIE_NAME, pending, PENDING_LIFETIME)
    }

    /// Opens a pending authorization cookie.
    ///
    /// # Errors
    ///
    /// Returns `SessionInvalid` when the cookie fails verification or the
    /// callback window has closed.
    pub fn open_pending(&self, cookie: &Cookie<'_>) -> Result<PendingAuthorization, SessionInvalid> {
        let pending: PendingAuthorization = self.open(cookie)?;
        if pending.is_expired_at(Utc::now()) {
            return Err(SessionInvalid::Expired {
                expired_at: expiry(pending.created_at(), PENDING_LIFETIME),
            });
        }
        Ok(pending)
    }

    /// Cookie that deletes the pending authorization cookie.
    #[must_use]
    pub fn pending_removal(&self) -> Cookie<'static> {
        removal_cookie(PENDING_COOKIE_NAME.to_string())
    }

    fn seal<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        max_age: Duration,
    ) -> Result<Cookie<'static>, SealError> {
        let payload = serde_json::to_string(value).map_err(|e| SealError {
            reason: e.to_string(),
        })?;

        let mut jar = CookieJar::new();
        jar.private_mut(&self.key)
            .add(Cookie::new(name.to_string(), payload));
        let sealed = jar
            .get(name)
            .map(|c| c.value().to_string())
            .ok_or_else(|| SealError {
                reason: "sealed cookie missing from jar".to_string(),
            })?;

        if sealed.len() > MAX_COOKIE_BYTES {
            warn!(
                cookie = name,
                bytes = sealed.len(),
                "sealed cookie exceeds browser size limits"
            );
        }

        Ok(Cookie::build((name.to_string(), sealed))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(max_age.num_seconds()))
            .build())
    }

    fn open<T: DeserializeOwned>(&self, cookie: &Cookie<'_>) -> Result<T, SessionInvalid> {
        let jar = CookieJar::new();
        let sealed = Cookie::new(cookie.name().to_string(), cookie.value().to_string());
        let plain = jar
            .private(&self.key)
            .decrypt(sealed)
            .ok_or(SessionInvalid::SignatureMismatch)?;
        serde_json::from_str(plain.value()).map_err(|e| SessionInvalid::Malformed {
            reason: e.to_string(),
        })
    }
}

fn removal_cookie(name: String) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;

    fn principal(subject: &str) -> Principal {
        let mut claims = ClaimSet::new();
        claims.insert("sub", [subject]);
        claims.insert("name", ["Alice"]);
        claims.insert("role", ["admin"]);
        Principal::from_claims(claims, "name", "role").expect("principal")
    }

    fn tokens() -> TokenBundle {
        TokenBundle::new(
            "id.jwt".to_string(),
            "access".to_string(),
            Some("refresh".to_string()),
            Utc::now() + Duration::hours(1),
            vec!["openid".to_string()],
        )
    }

    fn store() -> SessionStore {
        SessionStore::new(Key::generate())
    }

    #[test]
    fn restore_returns_persisted_principal() {
        let store = store();
        let original = principal("alice");

        let (ticket, cookie) = store.persist(original.clone(), tokens()).expect("persist");
        let restored = store.restore(&cookie).expect("restore");

        assert_eq!(restored.principal(), &original);
        assert_eq!(restored.id(), ticket.id());
        assert_eq!(restored.tokens().access_token(), "access");
    }

    #[test]
    fn cookie_flags() {
        let (_, cookie) = store().persist(principal("alice"), tokens()).expect("persist");

        assert_eq!(cookie.name(), DEFAULT_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert!(cookie.max_age().is_some());
    }

    #[test]
    fn cookie_value_is_not_readable() {
        let (_, cookie) = store().persist(principal("alice"), tokens()).expect("persist");
        assert!(!cookie.value().contains("alice"));
        assert!(!cookie.value().contains("access"));
    }

    #[test]
    fn expired_ticket_is_invalid() {
        let store = store().with_lifetime(Duration::seconds(-1));
        let (_, cookie) = store.persist(principal("alice"), tokens()).expect("persist");

        assert!(matches!(
            store.restore(&cookie),
            Err(SessionInvalid::Expired { .. })
        ));
    }

    #[test]
    fn restore_at_checks_supplied_clock() {
        let store = store();
        let (ticket, cookie) = store.persist(principal("alice"), tokens()).expect("persist");

        assert!(store.restore_at(&cookie, ticket.expires_at() - Duration::seconds(1)).is_ok());
        assert!(matches!(
            store.restore_at(&cookie, ticket.expires_at()),
            Err(SessionInvalid::Expired { .. })
        ));
    }

    #[test]
    fn tampered_cookie_fails_verification() {
        let store = store();
        let (_, cookie) = store.persist(principal("alice"), tokens()).expect("persist");

        let mut value = cookie.value().to_string();
        let last = value.pop().expect("non-empty");
        value.push(if last == 'A' { 'B' } else { 'A' });
        let tampered = Cookie::new(DEFAULT_COOKIE_NAME, value);

        assert_eq!(
            store.restore(&tampered).unwrap_err(),
            SessionInvalid::SignatureMismatch
        );
    }

    #[test]
    fn foreign_key_fails_verification() {
        let (_, cookie) = store().persist(principal("alice"), tokens()).expect("persist");
        assert_eq!(
            store().restore(&cookie).unwrap_err(),
            SessionInvalid::SignatureMismatch
        );
    }

    #[test]
    fn renamed_cookie_fails_verification() {
        let store = store();
        let (_, cookie) = store.persist(principal("alice"), tokens()).expect("persist");
        let renamed = Cookie::new("other", cookie.value().to_string());
        assert_eq!(
            store.restore(&renamed).unwrap_err(),
            SessionInvalid::SignatureMismatch
        );
    }

    #[test]
    fn garbage_cookie_fails_verification() {
        let garbage = Cookie::new(DEFAULT_COOKIE_NAME, "not even base64!");
        assert_eq!(
            store().restore(&garbage).unwrap_err(),
            SessionInvalid::SignatureMismatch
        );
    }

    #[test]
    fn sealed_non_ticket_is_malformed() {
        let store = store();
        let cookie = store
            .seal(DEFAULT_COOKIE_NAME, &"just a string", Duration::hours(1))
            .expect("seal");
        assert!(matches!(
            store.restore(&cookie),
            Err(SessionInvalid::Malformed { .. })
        ));
    }

    #[test]
    fn inspect_classifies_cookies() {
        let store = store();
        let (_, cookie) = store.persist(principal("alice"), tokens()).expect("persist");

        assert!(matches!(store.inspect(None), SessionState::Missing));
        assert!(store.inspect(Some(&cookie)).ticket().is_some());
        let garbage = Cookie::new(DEFAULT_COOKIE_NAME, "x");
        assert!(matches!(
            store.inspect(Some(&garbage)),
            SessionState::Invalid(SessionInvalid::SignatureMismatch)
        ));
    }

    #[test]
    fn slides_after_half_lifetime() {
        let store = store().with_lifetime(Duration::minutes(60));
        let (ticket, _) = store.persist(principal("alice"), tokens()).expect("persist");

        assert!(store.slide(&ticket, ticket.issued_at() + Duration::minutes(10)).is_none());

        let later = ticket.issued_at() + Duration::minutes(45);
        let slid = store.slide(&ticket, later).expect("slides");
        assert_eq!(slid.id(), ticket.id());
        assert_eq!(slid.expires_at(), later + Duration::minutes(60));
        assert_eq!(slid.issued_at(), ticket.issued_at());
    }

    #[test]
    fn oversized_lifetime_saturates() {
        let now = Utc::now();
        let ticket = SessionTicket::issue(principal("alice"), tokens(), Duration::MAX, now);
        assert_eq!(ticket.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            ticket.extended(Duration::MAX, now).expires_at(),
            DateTime::<Utc>::MAX_UTC
        );
        assert!(!ticket.is_expired_at(now));
    }

    #[test]
    fn pending_roundtrip() {
        let store = store();
        let pending = PendingAuthorization::new(
            "state".to_string(),
            "nonce".to_string(),
            "verifier".to_string(),
            "/reports".to_string(),
        );

        let cookie = store.seal_pending(&pending).expect("seal");
        assert_eq!(cookie.name(), PENDING_COOKIE_NAME);
        assert_eq!(store.open_pending(&cookie).expect("open"), pending);
    }

    #[test]
    fn removal_cookies_expire_immediately() {
        let store = store().with_cookie_name("custom");
        let removal = store.removal();
        assert_eq!(removal.name(), "custom");
        assert_eq!(removal.max_age(), Some(time::Duration::ZERO));
        assert_eq!(store.pending_removal().name(), PENDING_COOKIE_NAME);
    }

    #[test]
    fn insecure_cookies_for_development() {
        let store = store().with_secure(false);
        let (_, cookie) = store.persist(principal("alice"), tokens()).expect("persist");
        assert_eq!(cookie.secure(), Some(false));
    }
}
