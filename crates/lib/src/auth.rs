//! Sender authorization: numeric identities checked against a fixed allow-list.
//!
//! The allow-list is built once from config and never changes afterwards. Anything that
//! does not parse as a canonical numeric identity is treated as unauthorized.

use std::collections::HashSet;
use std::fmt;

/// Numeric sender identity (e.g. a Telegram user id).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Identity(u64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,
    #[error("identity {0:?} is not a canonical decimal number")]
    Malformed(String),
}

impl Identity {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Parse a raw sender id. Only plain ASCII digits without a sign, surrounding
    /// whitespace or leading zeros are accepted, so equal strings map to equal ids.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::Malformed(raw.to_string()));
        }
        let id: u64 = raw
            .parse()
            .map_err(|_| IdentityError::Malformed(raw.to_string()))?;
        if id.to_string() != raw {
            return Err(IdentityError::Malformed(raw.to_string()));
        }
        Ok(Self(id))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable set of identities allowed to use the relay.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: HashSet<Identity>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Build from config strings. Entries are trimmed and blanks skipped; any other
    /// malformed entry is an error so a typo never silently locks a user out.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, IdentityError> {
        let mut ids = HashSet::new();
        for entry in entries {
            let e = entry.as_ref().trim();
            if e.is_empty() {
                continue;
            }
            ids.insert(Identity::parse(e)?);
        }
        Ok(Self { ids })
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Exact-match check of a raw sender id. Fails closed on malformed input.
    pub fn is_authorized(&self, sender: &str) -> bool {
        match Identity::parse(sender) {
            Ok(id) => self.ids.contains(&id),
            Err(e) => {
                log::debug!("auth: rejecting malformed sender id: {}", e);
                false
            }
        }
    }
}
