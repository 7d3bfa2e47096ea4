use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a freshly minted hypervisor session stays reusable.
pub const AUTH_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// An authenticated hypervisor session: ticket cookie plus anti-CSRF token.
///
/// Sessions are never mutated in place. Re-authentication produces a new
/// `AuthSession` which replaces the cache slot by writing a new version.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuthSession {
    /// Opaque session ticket, sent as the auth cookie.
    pub ticket: String,
    /// Anti-CSRF token, sent as a header on mutating requests.
    pub csrf_token: String,
    /// The principal the ticket was issued to (e.g. `root@pam`).
    pub principal: String,
    /// When the ticket was obtained.
    pub obtained_at: DateTime<Utc>,
}

impl AuthSession {
    /// Creates a session obtained now.
    pub fn new(
        ticket: impl Into<String>,
        csrf_token: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        Self::obtained_at(ticket, csrf_token, principal, Utc::now())
    }

    /// Creates a session with an explicit acquisition time.
    pub fn obtained_at(
        ticket: impl Into<String>,
        csrf_token: impl Into<String>,
        principal: impl Into<String>,
        obtained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket: ticket.into(),
            csrf_token: csrf_token.into(),
            principal: principal.into(),
            obtained_at,
        }
    }

    /// Age of the session at `now`. Clock skew into the future reads as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.obtained_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the session is still younger than `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("ticket", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .field("principal", &self.principal)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Which resolution tier produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum SessionSource {
    /// Ticket and token were supplied verbatim by the caller.
    Explicit,
    /// A cached session younger than the TTL was reused.
    Cache,
    /// A fresh username/password exchange was performed.
    Password,
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Cache => "cache",
            Self::Password => "password",
        };
        f.write_str(s)
    }
}
