//! Identifier types used throughout NetMesh.
//!
//! A [`NetMeshBaseIdentifier`] names a node (or an external resource handled
//! by a Probe). A [`MeshObjectIdentifier`] is scoped to the node that holds
//! the object's home replica, so the owning node can always be derived from
//! the identifier itself.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Separator between the node part and the local part of a MeshObject identifier.
const LOCAL_SEPARATOR: char = '#';

/// Globally unique, URI-like address of a NetMeshBase.
///
/// Identifiers are totally ordered by their string form. The ordering is
/// used as a coordinator-free tie-breaker (e.g. for concurrent lock requests).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetMeshBaseIdentifier(String);

impl NetMeshBaseIdentifier {
    /// Parses an identifier of the form `scheme://rest`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidNetMeshBaseIdentifier(s.to_string());

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty()
            || rest.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(invalid());
        }
        if s.chars().any(|c| c.is_whitespace() || c == LOCAL_SEPARATOR) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the scheme, e.g. `tcp` or `https`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map(|(s, _)| s).unwrap_or_default()
    }

    /// Returns everything after `://`.
    #[must_use]
    pub fn authority(&self) -> &str {
        self.0.split_once("://").map(|(_, r)| r).unwrap_or_default()
    }
}

impl fmt::Display for NetMeshBaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NetMeshBaseIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetMeshBaseIdentifier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NetMeshBaseIdentifier> for String {
    fn from(id: NetMeshBaseIdentifier) -> Self {
        id.0
    }
}

/// Identifier of a MeshObject, scoped to the node holding its home replica.
///
/// The external form is `<node>#<local>`. The MeshBase's own home object has
/// an empty local part and its external form is just `<node>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshObjectIdentifier {
    base: NetMeshBaseIdentifier,
    local: String,
}

impl MeshObjectIdentifier {
    /// Creates an identifier from its parts.
    pub fn new(base: NetMeshBaseIdentifier, local: impl Into<String>) -> Result<Self, Error> {
        let local = local.into();
        if local.chars().any(|c| c.is_whitespace() || c == LOCAL_SEPARATOR) {
            return Err(Error::InvalidMeshObjectIdentifier(format!(
                "{base}{LOCAL_SEPARATOR}{local}"
            )));
        }
        Ok(Self { base, local })
    }

    /// The identifier of the home object of the given MeshBase.
    #[must_use]
    pub fn home_object(base: NetMeshBaseIdentifier) -> Self {
        Self {
            base,
            local: String::new(),
        }
    }

    /// Creates a new, time-ordered, unique identifier scoped to `base`.
    #[must_use]
    pub fn random(base: NetMeshBaseIdentifier) -> Self {
        Self {
            base,
            local: Uuid::now_v7().simple().to_string(),
        }
    }

    /// Parses the external form `<node>#<local>` or `<node>`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.split_once(LOCAL_SEPARATOR) {
            Some((base, local)) => {
                let base = NetMeshBaseIdentifier::parse(base)
                    .map_err(|_| Error::InvalidMeshObjectIdentifier(s.to_string()))?;
                Self::new(base, local)
            }
            None => NetMeshBaseIdentifier::parse(s)
                .map(Self::home_object)
                .map_err(|_| Error::InvalidMeshObjectIdentifier(s.to_string())),
        }
    }

    /// The node whose MeshBase holds the home replica.
    #[must_use]
    pub fn base(&self) -> &NetMeshBaseIdentifier {
        &self.base
    }

    /// The part of the identifier that is local to the node.
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.local
    }

    /// Whether this identifies the home object of a MeshBase.
    #[must_use]
    pub fn is_home_object(&self) -> bool {
        self.local.is_empty()
    }

    /// Returns the external form.
    #[must_use]
    pub fn to_external_form(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MeshObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}{}{}", self.base, LOCAL_SEPARATOR, self.local)
        }
    }
}

impl FromStr for MeshObjectIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MeshObjectIdentifier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MeshObjectIdentifier> for String {
    fn from(id: MeshObjectIdentifier) -> Self {
        id.to_string()
    }
}
