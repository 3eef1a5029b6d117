//! MultiAddress: network address of a node in `/ip4|dns/<host>/tcp/<port>/p2p/<id>` form.
//!
//! Peer identifiers are fixed-length (52 characters). Probe output longer than
//! that is truncated; anything shorter is rejected, never padded.

use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Length of a peer identifier in the node's p2p protocol.
pub const PEER_ID_LEN: usize = 52;
/// TCP port the nodes listen on for p2p traffic.
pub const P2P_PORT: u16 = 2121;

const IP4_PREFIX: &str = "/ip4/";
const DNS_PREFIX: &str = "/dns/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Peer id too short: expected {expected} chars, got {actual} ({id:?})")]
    IdTooShort {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("MultiAddress must begin with /ip4/ or /dns/: {0:?}")]
    MissingPrefix(String),
    #[error("MultiAddress missing /p2p/ segment: {0:?}")]
    MissingPeerId(String),
    #[error("MultiAddress peer id must be {expected} chars, got {actual}: {addr:?}")]
    WrongIdLength {
        addr: String,
        expected: usize,
        actual: usize,
    },
    #[error("Not an IPv4 address: {0:?}")]
    InvalidIp(String),
}

/// Cut a probed identifier down to `max_len` characters.
///
/// Exact length is returned unchanged, longer input is cut, shorter input is an error.
pub fn truncate_peer_id(id: &str, max_len: usize) -> Result<String, FormatError> {
    let actual = id.chars().count();
    if actual < max_len {
        return Err(FormatError::IdTooShort {
            id: id.to_string(),
            expected: max_len,
            actual,
        });
    }
    Ok(id.chars().take(max_len).collect())
}

/// Whether a `connectsTo` entry is already an address rather than a node name.
pub fn is_literal_address(entry: &str) -> bool {
    entry.contains("dns") || entry.contains("ip4")
}

/// Whether a string starts with one of the accepted address prefixes.
pub fn has_valid_prefix(addr: &str) -> bool {
    addr.starts_with(IP4_PREFIX) || addr.starts_with(DNS_PREFIX)
}

/// Host part of an address, ahead of the transport segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip4(Ipv4Addr),
    Dns(String),
}

impl Host {
    /// Parse raw IP probe output.
    pub fn parse_ip(raw: &str) -> Result<Self, FormatError> {
        let trimmed = raw.trim();
        trimmed
            .parse::<Ipv4Addr>()
            .map(Host::Ip4)
            .map_err(|_| FormatError::InvalidIp(trimmed.to_string()))
    }

    /// Address prefix up to and including `/p2p/`.
    pub fn prefix(&self) -> String {
        match self {
            Host::Ip4(ip) => format!("{IP4_PREFIX}{ip}/tcp/{P2P_PORT}/p2p/"),
            Host::Dns(name) => format!("{DNS_PREFIX}{name}/tcp/{P2P_PORT}/p2p/"),
        }
    }
}

/// A validated multiaddress.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiAddress(String);

impl MultiAddress {
    /// Build an address from a host and an already-truncated peer id.
    pub fn new(host: &Host, peer_id: &str) -> Result<Self, FormatError> {
        format!("{}{}", host.prefix(), peer_id).parse()
    }

    /// The trailing peer identifier.
    pub fn peer_id(&self) -> &str {
        self.0.rsplit("/p2p/").next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for MultiAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MultiAddress {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !has_valid_prefix(s) {
            return Err(FormatError::MissingPrefix(s.to_string()));
        }
        let Some((_, id)) = s.rsplit_once("/p2p/") else {
            return Err(FormatError::MissingPeerId(s.to_string()));
        };
        let actual = id.chars().count();
        if actual != PEER_ID_LEN {
            return Err(FormatError::WrongIdLength {
                addr: s.to_string(),
                expected: PEER_ID_LEN,
                actual,
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for MultiAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Comma-separated connection string built in `connectsTo` order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one segment, rejecting anything without an accepted prefix.
    pub fn push(&mut self, segment: &str) -> Result<(), FormatError> {
        if !has_valid_prefix(segment) {
            return Err(FormatError::MissingPrefix(segment.to_string()));
        }
        if !self.0.is_empty() {
            self.0.push(',');
        }
        self.0.push_str(segment);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(',').filter(|s| !s.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConnectionString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
