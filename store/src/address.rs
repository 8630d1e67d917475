use crate::path::PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A memory-space principal identifier.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(String);

impl SpaceId {
    /// Creates a space identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SpaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity URI within a memory space.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A media-type tag for a stored document.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    /// Creates a media type tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// `application/json`, the media type of every document this engine
    /// interprets.
    pub fn json() -> Self {
        Self::new("application/json")
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pointer into a JSON document held in a memory space.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Address {
    /// The memory space the document lives in.
    pub space: SpaceId,
    /// The entity the document is an assertion about.
    pub entity: EntityId,
    /// The media type of the document.
    pub media: MediaType,
    /// The path into the document's value.
    pub path: PathBuf,
}

impl Address {
    /// Creates an address.
    pub fn new(space: SpaceId, entity: EntityId, media: MediaType, path: PathBuf) -> Self {
        Self {
            space,
            entity,
            media,
            path,
        }
    }

    /// Creates a JSON-document address.
    pub fn json(space: impl Into<SpaceId>, entity: impl Into<EntityId>, path: PathBuf) -> Self {
        Self::new(space.into(), entity.into(), MediaType::json(), path)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.space, self.entity)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        Ok(())
    }
}

/// An observation (read) or desired state (write) at an address.
///
/// A `value` of `None` attests non-existence.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    /// The address the attestation is about.
    pub address: Address,
    /// The observed or desired sub-value.
    pub value: Option<Value>,
}

impl Attestation {
    /// Creates an attestation.
    pub fn new(address: Address, value: Option<Value>) -> Self {
        Self { address, value }
    }
}

impl std::fmt::Display for Attestation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} = {}", self.address, value),
            None => write!(f, "{} = undefined", self.address),
        }
    }
}

/// Identity of a committed [`Fact`], the blake3 hash of its canonical
/// JSON encoding.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FactId([u8; 32]);

impl std::fmt::Debug for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A committed assertion about an entity: the current value of its
/// document plus a causal reference to the fact it supersedes.
///
/// Facts form a per-entity chain; a replica stores the tip. Retractions
/// are facts with an absent value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// The entity the fact is about.
    pub entity: EntityId,
    /// The media type of the document.
    pub media: MediaType,
    /// The asserted value; `None` retracts the entity.
    pub value: Option<Value>,
    /// The fact this one supersedes, if any.
    pub cause: Option<FactId>,
}

impl Fact {
    /// Creates an initial fact with no predecessor.
    pub fn assert(entity: EntityId, media: MediaType, value: Option<Value>) -> Self {
        Self {
            entity,
            media,
            value,
            cause: None,
        }
    }

    /// Creates a fact superseding `prior`.
    pub fn next(prior: &Fact, value: Option<Value>) -> Self {
        Self {
            entity: prior.entity.clone(),
            media: prior.media.clone(),
            value,
            cause: Some(prior.id()),
        }
    }

    /// Returns the fact's content identity.
    pub fn id(&self) -> FactId {
        let bytes = serde_json::to_vec(self).expect("facts are valid json");
        FactId(blake3::hash(&bytes).into())
    }
}

/// The portable result of closing one space's journal: the read
/// invariants to validate and the folded per-entity facts to publish.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// The space the commit applies to.
    pub space: SpaceId,
    /// Read invariants captured by the transaction.
    pub claims: Vec<Attestation>,
    /// One folded fact per written entity.
    pub facts: Vec<Fact>,
}

impl Commit {
    /// Returns true if the commit neither claims nor changes anything.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty() && self.facts.is_empty()
    }
}
