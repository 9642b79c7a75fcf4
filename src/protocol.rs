//! Wire types for the hub's JSON-over-WebSocket protocol.
//!
//! Every broadcast payload is one UTF-8 text frame carrying a single JSON
//! document: the full account collection, the full call collection, or a
//! one-shot event object. Updates are never batched or split across frames.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Channels ──────────────────────────────────────────────────────────────────

/// The fixed set of broadcast channels. A client selects one by endpoint path
/// (`/ws/accounts`, `/ws/calls`, ...) and keeps it for the connection's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Accounts,
    Contacts,
    Calls,
    Chat,
    Meter,
    VideoSource,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Accounts => "accounts",
            Channel::Contacts => "contacts",
            Channel::Calls => "calls",
            Channel::Chat => "chat",
            Channel::Meter => "meter",
            Channel::VideoSource => "video-source",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Channel::Accounts),
            "contacts" => Ok(Channel::Contacts),
            "calls" => Ok(Channel::Calls),
            "chat" => Ok(Channel::Chat),
            "meter" => Ok(Channel::Meter),
            "video-source" => Ok(Channel::VideoSource),
            _ => Err(()),
        }
    }
}

// ── Accounts ──────────────────────────────────────────────────────────────────

/// SIP transport for an account registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
        }
    }
}

/// One credential record. Identity is the `(user, domain)` pair — unique
/// within the store. `status` and `current` are derived: `status` stays
/// absent until the engine first reports on the registration, and at most
/// one record in the whole store carries `current = true`.
///
/// Unknown keys in the persisted/wire document are free-form transport or
/// auth options, kept verbatim in `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub domain: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<bool>,
    #[serde(flatten)]
    pub options: BTreeMap<String, String>,
}

impl Account {
    /// Structural identity check against a `(user, domain)` pair.
    pub fn matches(&self, user: &str, domain: &str) -> bool {
        self.user == user && self.domain == domain
    }

    /// Canonical address-of-record. Display and engine-facing only; lookups
    /// go through [`parse_aor`] and structural comparison instead.
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.user, self.domain)
    }

    /// Full registration address handed to the engine, including transport,
    /// auth password and any free-form options.
    pub fn registration_addr(&self) -> String {
        let mut addr = format!(
            "<sip:{}@{};transport={}>;auth_pass={}",
            self.user,
            self.domain,
            self.transport.as_str(),
            self.password
        );
        for (key, value) in &self.options {
            addr.push_str(&format!(";{}={}", key, value));
        }
        addr
    }
}

/// Split an address-of-record string (`"<scheme>:<user>@<domain>"`) into its
/// `(user, domain)` parts.
pub fn parse_aor(aor: &str) -> Option<(&str, &str)> {
    let rest = match aor.split_once(':') {
        Some((_, rest)) => rest,
        None => aor,
    };
    rest.split_once('@')
}

// ── Client Commands ───────────────────────────────────────────────────────────

/// Mutation commands accepted from a client on the `accounts` channel.
/// No other channel accepts commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum AccountCommand {
    /// Add (or replace, by identity) an account. The account fields sit
    /// beside the `command` key in the same object.
    Add {
        #[serde(flatten)]
        account: Account,
    },

    /// Remove the account matching `(user, domain)`. A miss is a no-op.
    Delete { user: String, domain: String },
}

// ── One-shot Call Notices ─────────────────────────────────────────────────────

/// Out-of-band event objects on the `calls` channel, distinct from the
/// steady-state registry snapshot. Clients render these as toasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "callback", rename_all = "UPPERCASE")]
pub enum CallNotice {
    /// A call ended; `message` is the engine's human-readable close reason.
    Closed { message: String },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
