//! Allow-list access checks for the presentation layer.
//!
//! Sessions are only valid on the policy that issued them: the policy keeps
//! every live token and [`AccessPolicy::check`] resolves the token, not the
//! principal the caller claims.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::config::IntakeConfig;
use crate::error::IntakeError;

const MIN_PASSWORD_LEN: usize = 8;

/// An authenticated principal with an opaque per-session token.
///
/// Sessions can only be obtained from [`AccessPolicy::open_session`] or
/// [`AccessPolicy::resume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    principal: String,
    token: String,
}

impl Session {
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Default)]
pub struct AccessPolicy {
    principals: HashSet<String>,
    /// Live sessions: token -> principal.
    sessions: RwLock<HashMap<String, String>>,
}

fn normalize(principal: &str) -> String {
    principal.trim().to_lowercase()
}

impl AccessPolicy {
    pub fn new<I, S>(principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            principals: principals
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &IntakeConfig) -> Self {
        Self::new(&config.authorized_principals)
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            log::warn!("Session table lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            log::warn!("Session table lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_authorized(&self, principal: &str) -> bool {
        self.principals.contains(&normalize(principal))
    }

    pub fn authorize(&self, principal: &str) -> Result<(), IntakeError> {
        if self.is_authorized(principal) {
            Ok(())
        } else {
            log::warn!("Rejected unauthorized principal '{}'", principal);
            Err(IntakeError::Unauthorized(principal.to_string()))
        }
    }

    /// Opens a session for an allow-listed principal. Only the password
    /// length is checked here.
    pub fn open_session(&self, principal: &str, password: &str) -> Result<Session, IntakeError> {
        self.authorize(principal)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IntakeError::Unauthorized(principal.to_string()));
        }

        let session = Session {
            principal: normalize(principal),
            token: uuid::Uuid::new_v4().to_string(),
        };
        self.write_sessions()
            .insert(session.token.clone(), session.principal.clone());
        log::info!("Opened session for '{}'", session.principal);
        Ok(session)
    }

    /// Looks up the session a bearer token belongs to.
    pub fn resume(&self, token: &str) -> Result<Session, IntakeError> {
        let principal = self
            .read_sessions()
            .get(token)
            .cloned()
            .ok_or_else(|| {
                log::warn!("Rejected unknown session token");
                IntakeError::Unauthorized("unknown session".to_string())
            })?;
        self.authorize(&principal)?;
        Ok(Session {
            principal,
            token: token.to_string(),
        })
    }

    /// Accepts a session only if this policy issued its token to the same
    /// principal and that principal is still allow-listed.
    pub fn check(&self, session: &Session) -> Result<(), IntakeError> {
        let issued_to = self.read_sessions().get(&session.token).cloned();
        match issued_to {
            Some(principal) if principal == session.principal => self.authorize(&principal),
            _ => {
                log::warn!(
                    "Rejected session for '{}' with a token this service did not issue",
                    session.principal
                );
                Err(IntakeError::Unauthorized(session.principal.clone()))
            }
        }
    }

    /// Ends a session. Returns whether the token was live.
    pub fn close_session(&self, token: &str) -> bool {
        self.write_sessions().remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_is_case_insensitive() {
        let policy = AccessPolicy::new(["Ops@Example.com"]);
        assert!(policy.authorize("ops@example.com").is_ok());
        assert!(policy.authorize("  OPS@EXAMPLE.COM ").is_ok());
    }

    #[test]
    fn test_unknown_principal_rejected() {
        let policy = AccessPolicy::new(["ops@example.com"]);
        assert!(matches!(
            policy.authorize("mallory@example.com"),
            Err(IntakeError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_open_session_checks_password_length() {
        let policy = AccessPolicy::new(["ops@example.com"]);
        assert!(policy.open_session("ops@example.com", "short").is_err());

        let session = policy
            .open_session("ops@example.com", "long-enough")
            .unwrap();
        assert_eq!(session.principal(), "ops@example.com");
        assert!(!session.token().is_empty());
        assert!(policy.check(&session).is_ok());
    }

    #[test]
    fn test_sessions_get_distinct_tokens() {
        let policy = AccessPolicy::new(["ops@example.com"]);
        let a = policy.open_session("ops@example.com", "password1").unwrap();
        let b = policy.open_session("ops@example.com", "password1").unwrap();
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn test_session_from_another_policy_is_rejected() {
        let ours = AccessPolicy::new(["ops@example.com"]);
        let theirs = AccessPolicy::new(["ops@example.com"]);
        let session = theirs.open_session("ops@example.com", "password1").unwrap();

        assert!(matches!(
            ours.check(&session),
            Err(IntakeError::Unauthorized(_))
        ));
        assert!(ours.resume(session.token()).is_err());
    }

    #[test]
    fn test_resume_by_token() {
        let policy = AccessPolicy::new(["ops@example.com"]);
        let session = policy.open_session("OPS@example.com", "password1").unwrap();

        let resumed = policy.resume(session.token()).unwrap();
        assert_eq!(resumed, session);
        assert!(policy.resume("not-a-token").is_err());
    }

    #[test]
    fn test_closed_session_is_rejected() {
        let policy = AccessPolicy::new(["ops@example.com"]);
        let session = policy.open_session("ops@example.com", "password1").unwrap();

        assert!(policy.close_session(session.token()));
        assert!(!policy.close_session(session.token()));
        assert!(policy.check(&session).is_err());
    }
}
