//! # Identifiers
//!
//! Addressing for every message: who sent it, who should receive it, and the
//! filters handlers register interest with.
//!
//! A concrete `from`/`to` carries a single [`IdentifierType`]; a filter may
//! carry a [`TypeSet`] instead so it can target an open set of recipient kinds
//! (for instance "any worker or runnable"). Matching is two-sided: both the
//! filter and the candidate may carry a set.

use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node kinds a message can be addressed to or sent from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Index,
    Worker,
    Ui,
    Runnable,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 4] = [Self::Index, Self::Worker, Self::Ui, Self::Runnable];

    fn bit(self) -> u8 {
        match self {
            Self::Index => 1,
            Self::Worker => 1 << 1,
            Self::Ui => 1 << 2,
            Self::Runnable => 1 << 3,
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Worker => write!(f, "worker"),
            Self::Ui => write!(f, "ui"),
            Self::Runnable => write!(f, "runnable"),
        }
    }
}

impl std::str::FromStr for IdentifierType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Self::Index),
            "worker" => Ok(Self::Worker),
            "ui" => Ok(Self::Ui),
            "runnable" => Ok(Self::Runnable),
            _ => Err(format!("Invalid identifier type: {s}")),
        }
    }
}

/// Set of identifier types, serialized as a list of type names
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeSet(u8);

impl TypeSet {
    pub fn new() -> Self {
        Self(0)
    }

    /// Builder-style insert
    pub fn with(mut self, kind: IdentifierType) -> Self {
        self.insert(kind);
        self
    }

    pub fn insert(&mut self, kind: IdentifierType) {
        self.0 |= kind.bit();
    }

    pub fn contains(&self, kind: IdentifierType) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn intersects(&self, other: &TypeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = IdentifierType> + '_ {
        IdentifierType::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<IdentifierType> for TypeSet {
    fn from_iter<I: IntoIterator<Item = IdentifierType>>(iter: I) -> Self {
        let mut set = TypeSet::new();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for TypeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for kind in self.iter() {
            seq.serialize_element(&kind)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TypeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TypeSetVisitor;

        impl<'de> Visitor<'de> for TypeSetVisitor {
            type Value = TypeSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of identifier types")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TypeSet, A::Error> {
                let mut set = TypeSet::new();
                while let Some(kind) = seq.next_element::<IdentifierType>()? {
                    set.insert(kind);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_seq(TypeSetVisitor)
    }
}

/// Address of a node, or a filter over nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<IdentifierType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<TypeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Identifier {
    pub fn index() -> Self {
        Self::of_type(IdentifierType::Index)
    }

    pub fn worker(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(IdentifierType::Worker),
            ..Default::default()
        }
    }

    pub fn ui(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(IdentifierType::Ui),
            ..Default::default()
        }
    }

    pub fn runnable(name: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(IdentifierType::Runnable),
            worker: Some(worker.into()),
            ..Default::default()
        }
    }

    /// Filter matching every identifier of one kind
    pub fn of_type(kind: IdentifierType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Filter matching every identifier whose kind is in the set
    pub fn of_types(types: TypeSet) -> Self {
        Self {
            types: Some(types),
            ..Default::default()
        }
    }

    /// Restrict a filter to a single worker
    pub fn on_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Name of the worker this identifier belongs to, if any.
    ///
    /// A worker identifier owns itself; a runnable identifier is owned by its
    /// `worker` field.
    pub fn worker_name(&self) -> Option<&str> {
        if self.kind == Some(IdentifierType::Worker) {
            self.name.as_deref().or(self.worker.as_deref())
        } else {
            self.worker.as_deref()
        }
    }

    /// Whether the identifier could denote a node of the given kind
    pub fn admits(&self, kind: IdentifierType) -> bool {
        match (&self.types, self.kind) {
            (Some(types), _) => types.contains(kind),
            (None, Some(own)) => own == kind,
            (None, None) => false,
        }
    }

    /// Whether `candidate` satisfies this identifier used as a filter.
    ///
    /// Unset filter fields are wildcards. The type check is two-sided: a filter
    /// set must intersect the candidate set (or contain its single type), and a
    /// single filter type must be contained in the candidate set (or equal its
    /// single type).
    pub fn matches(&self, candidate: &Identifier) -> bool {
        let type_ok = match (&self.types, self.kind) {
            (Some(filter_types), _) => match (&candidate.types, candidate.kind) {
                (Some(candidate_types), _) => filter_types.intersects(candidate_types),
                (None, Some(kind)) => filter_types.contains(kind),
                (None, None) => false,
            },
            (None, Some(kind)) => match (&candidate.types, candidate.kind) {
                (Some(candidate_types), _) => candidate_types.contains(kind),
                (None, candidate_kind) => candidate_kind == Some(kind),
            },
            (None, None) => true,
        };
        if !type_ok {
            return false;
        }

        if let Some(name) = &self.name {
            if candidate.name.as_ref() != Some(name) {
                return false;
            }
        }

        if let Some(worker) = &self.worker {
            if candidate.worker.as_ref() != Some(worker) {
                return false;
            }
        }

        true
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.types, self.kind) {
            (Some(types), _) => {
                let kinds: Vec<String> = types.iter().map(|k| k.to_string()).collect();
                write!(f, "[{}]", kinds.join("|"))?;
            }
            (None, Some(kind)) => write!(f, "{kind}")?,
            (None, None) => write!(f, "*")?,
        }
        if let Some(worker) = &self.worker {
            write!(f, "@{worker}")?;
        }
        if let Some(name) = &self.name {
            write!(f, "/{name}")?;
        }
        Ok(())
    }
}
