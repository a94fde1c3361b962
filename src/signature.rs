//! Generic signatures and protocol requirement signatures.

use crate::fingerprint::{generic_signature_fingerprint, requirement_signature_fingerprint, HashValue};
use crate::protocol_graph::TypeAlias;
use crate::requirement::Requirement;
use crate::symbol::{GenericParamKey, ProtocolId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A generic parameter of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenericParamDecl {
    pub key: GenericParamKey,
    /// A parameter pack; only ever equal to other packs.
    pub is_pack: bool,
}

impl GenericParamDecl {
    pub const fn new(depth: u32, index: u32) -> Self {
        Self {
            key: GenericParamKey::new(depth, index),
            is_pack: false,
        }
    }

    pub const fn pack(depth: u32, index: u32) -> Self {
        Self {
            key: GenericParamKey::new(depth, index),
            is_pack: true,
        }
    }
}

/// What went wrong while computing a signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenericSignatureErrors(u8);

impl GenericSignatureErrors {
    /// Completion hit an iteration or depth limit.
    pub const COMPLETION_FAILED: GenericSignatureErrors = GenericSignatureErrors(1 << 0);
    /// Some requirement could not be turned into a rule.
    pub const HAS_INVALID_REQUIREMENTS: GenericSignatureErrors = GenericSignatureErrors(1 << 1);
    /// Two requirements cannot both hold.
    pub const HAS_CONFLICTS: GenericSignatureErrors = GenericSignatureErrors(1 << 2);

    pub const fn empty() -> Self {
        GenericSignatureErrors(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: GenericSignatureErrors) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: GenericSignatureErrors) {
        self.0 |= other.0;
    }

    pub const fn union(self, other: GenericSignatureErrors) -> Self {
        GenericSignatureErrors(self.0 | other.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Display for GenericSignatureErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::COMPLETION_FAILED, "completion-failed"),
            (Self::HAS_INVALID_REQUIREMENTS, "invalid-requirements"),
            (Self::HAS_CONFLICTS, "conflicts"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// The minimized requirements of a generic declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericSignature {
    pub params: Vec<GenericParamDecl>,
    /// Minimal requirements in canonical order.
    pub requirements: Vec<Requirement>,
    pub errors: GenericSignatureErrors,
}

impl GenericSignature {
    pub fn new(params: Vec<GenericParamDecl>, requirements: Vec<Requirement>) -> Self {
        Self {
            params,
            requirements,
            errors: GenericSignatureErrors::empty(),
        }
    }

    /// Cache key of the signature. Errors are not part of it.
    pub fn fingerprint(&self) -> HashValue {
        generic_signature_fingerprint(&self.params, &self.requirements)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for GenericSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if param.is_pack {
                write!(f, "each ")?;
            }
            write!(f, "{}", param.key)?;
        }
        for (i, req) in self.requirements.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " where " } else { ", " }, req)?;
        }
        write!(f, ">")
    }
}

/// The minimized requirements of one protocol, written on `Self`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSignature {
    pub protocol: ProtocolId,
    pub requirements: Vec<Requirement>,
    pub type_aliases: Vec<TypeAlias>,
    pub errors: GenericSignatureErrors,
}

impl RequirementSignature {
    /// An entry for a protocol with no requirements.
    pub fn empty(protocol: ProtocolId) -> Self {
        Self {
            protocol,
            requirements: Vec::new(),
            type_aliases: Vec::new(),
            errors: GenericSignatureErrors::empty(),
        }
    }

    pub fn fingerprint(&self) -> HashValue {
        requirement_signature_fingerprint(self.protocol, &self.requirements)
    }
}
