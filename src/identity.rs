//! Identities: who a message or presence record belongs to
//!
//! An `Identity` is shared as `Arc<Identity>` between the caller, the
//! session, cached messages and the presence tracker. The name and kind are
//! fixed at creation apart from the caller's own anonymous name, which is
//! only known once the server answers the join request. Everything learned
//! later (presence id, IP, join time, style) lives behind a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ProfileError, ProtocolError};
use crate::style::Style;

/// Tag used when an anonymous message carries no `<n####/>` marker
pub const DEFAULT_ANON_TAG: &str = "5504";

const ANON_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Anonymous,
    /// Unregistered name chosen per session
    Temporary,
    Registered,
}

#[derive(Debug, Clone, Default)]
struct IdentityDetails {
    name: String,
    presence_id: Option<String>,
    origin_ip: Option<String>,
    last_joined_at: Option<DateTime<Utc>>,
    style: Style,
}

/// Serializable view of an identity (never includes the credential)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySnapshot {
    pub name: String,
    pub kind: IdentityKind,
    pub presence_id: Option<String>,
    pub origin_ip: Option<String>,
    pub last_joined_at: Option<DateTime<Utc>>,
}

pub struct Identity {
    kind: IdentityKind,
    credential: Option<String>,
    details: RwLock<IdentityDetails>,
    /// `true` once the profile style is resolved
    profile_ready: watch::Sender<bool>,
}

impl Identity {
    fn build(name: &str, kind: IdentityKind, credential: Option<String>) -> Self {
        let (profile_ready, _) = watch::channel(true);
        Self {
            kind,
            credential,
            details: RwLock::new(IdentityDetails {
                name: name.trim().to_lowercase(),
                ..Default::default()
            }),
            profile_ready,
        }
    }

    /// Anonymous caller identity; the name is assigned on join
    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self::build("", IdentityKind::Anonymous, None))
    }

    /// Temporary name for this session
    pub fn temporary(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, IdentityKind::Temporary, None))
    }

    /// Registered account
    pub fn registered(name: &str, password: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            IdentityKind::Registered,
            Some(password.into()),
        ))
    }

    /// Identity seen in a protocol event
    pub(crate) fn observed(name: &str, kind: IdentityKind) -> Arc<Self> {
        Arc::new(Self::build(name, kind, None))
    }

    pub fn name(&self) -> String {
        self.details.read().name.clone()
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn presence_id(&self) -> Option<String> {
        self.details.read().presence_id.clone()
    }

    pub fn origin_ip(&self) -> Option<String> {
        self.details.read().origin_ip.clone()
    }

    pub fn last_joined_at(&self) -> Option<DateTime<Utc>> {
        self.details.read().last_joined_at
    }

    pub fn style(&self) -> Style {
        self.details.read().style.clone()
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        let details = self.details.read();
        IdentitySnapshot {
            name: details.name.clone(),
            kind: self.kind,
            presence_id: details.presence_id.clone(),
            origin_ip: details.origin_ip.clone(),
            last_joined_at: details.last_joined_at,
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        self.details.write().name = name.to_lowercase();
    }

    pub(crate) fn set_presence_id(&self, id: &str) {
        self.details.write().presence_id = Some(id.to_string());
    }

    pub(crate) fn set_origin_ip(&self, ip: &str) {
        if !ip.is_empty() {
            self.details.write().origin_ip = Some(ip.to_string());
        }
    }

    pub(crate) fn set_last_joined_at(&self, at: DateTime<Utc>) {
        self.details.write().last_joined_at = Some(at);
    }

    // ── Profile lifecycle ───────────────────────────────────────────

    /// Mark a profile fetch as in flight; `ready()` blocks until resolved
    pub fn begin_profile_load(&self) {
        self.profile_ready.send_replace(false);
    }

    /// Store the resolved style and wake `ready()` waiters
    pub fn resolve_profile(&self, style: Style) {
        self.details.write().style = style;
        self.profile_ready.send_replace(true);
    }

    pub fn is_profile_ready(&self) -> bool {
        *self.profile_ready.borrow()
    }

    /// Wait for any in-flight profile load to finish
    pub async fn ready(&self) {
        let mut rx = self.profile_ready.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Fetch the style from a profile source
    ///
    /// A failed fetch keeps the current style and still resolves, so a
    /// session waiting on `ready()` is never stuck on it.
    pub async fn load_profile(&self, source: &dyn ProfileSource) {
        self.begin_profile_load();
        let name = self.name();
        match source.fetch_style(&name).await {
            Ok(style) => {
                debug!(identity = %name, "profile loaded");
                self.resolve_profile(style);
            }
            Err(e) => {
                warn!(identity = %name, "profile load failed: {}", e);
                let current = self.style();
                self.resolve_profile(current);
            }
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("has_credential", &self.credential.is_some())
            .field("profile_ready", &self.is_profile_ready())
            .finish()
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

/// Source of profile styles (the HTTP profile service in practice)
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_style(&self, name: &str) -> Result<Style, ProfileError>;
}

// ── Anonymous names ─────────────────────────────────────────────────

/// Derive the display name of an anonymous user
///
/// Digit `i` of the result is the ones digit of `tag[i] + session_tail[i]`,
/// where `session_tail` is the last four characters of `session`.
pub fn anon_name(tag: &str, session: &str) -> Result<String, ProtocolError> {
    let bad = || ProtocolError::AnonymousTag {
        tag: tag.to_string(),
        session: session.to_string(),
    };

    let tail = session
        .get(session.len().saturating_sub(ANON_DIGITS)..)
        .ok_or_else(bad)?;

    let mut name = String::from("anon");
    for (t, s) in tag.chars().take(ANON_DIGITS).zip(tail.chars()) {
        let (t, s) = (t.to_digit(10).ok_or_else(bad)?, s.to_digit(10).ok_or_else(bad)?);
        name.push(char::from(b'0' + ((t + s) % 10) as u8));
    }
    if name.len() == "anon".len() {
        return Err(bad());
    }
    Ok(name)
}

/// Last four digits of the integer part of a server timestamp
pub fn anon_tag_from_time(time: &str) -> String {
    let whole = time.split('.').next().unwrap_or_default();
    whole
        .get(whole.len().saturating_sub(ANON_DIGITS)..)
        .unwrap_or(whole)
        .to_string()
}

// ── Registry ────────────────────────────────────────────────────────

/// Name → identity lookup for one room
///
/// Holds weak references only: an identity lives as long as a message,
/// presence entry or the caller holds it.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_name: HashMap<String, Weak<Identity>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: &Arc<Identity>) {
        let name = identity.name();
        if !name.is_empty() {
            self.by_name.insert(name, Arc::downgrade(identity));
        }
    }

    /// Existing identity of this name and kind, or a new one
    pub fn resolve(&mut self, name: &str, kind: IdentityKind) -> Arc<Identity> {
        let key = name.to_lowercase();
        if let Some(identity) = self.by_name.get(&key).and_then(Weak::upgrade) {
            if identity.kind() == kind {
                return identity;
            }
        }

        if self.by_name.len() >= 64 && self.by_name.len().is_power_of_two() {
            self.prune();
        }

        let identity = Identity::observed(&key, kind);
        self.by_name.insert(key, Arc::downgrade(&identity));
        identity
    }

    /// Drop entries whose identity is gone
    pub fn prune(&mut self) {
        self.by_name.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
