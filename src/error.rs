//! Error types.
//!
//! Two classes, kept strictly apart:
//! - recoverable errors (`RequirementError`, `ConfigError`) describe bad
//!   input and travel as values;
//! - `InvariantViolation` describes a broken engine invariant. It is only
//!   ever raised through [`fatal`], which logs the state dump and panics.

use crate::requirement::Type;
use crate::symbol::{GenericParamKey, LayoutConstraint, ProtocolId};
use std::fmt;

/// A requirement the type checker wrote that cannot be turned into a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    /// Two concrete types were required to be equal but differ structurally.
    ConcreteMismatch { lhs: Type, rhs: Type },
    /// A concrete type was required to conform to a protocol it does not conform to.
    NonConformingConcreteType { ty: Type, protocol: String },
    /// A pack parameter was equated with a scalar parameter.
    PackMismatch { lhs: Type, rhs: Type },
    /// A concrete type cannot satisfy a layout constraint.
    LayoutMismatch { ty: Type, layout: LayoutConstraint },
    /// A superclass requirement names a non-class type.
    NotAClass(Type),
    UnknownProtocol(ProtocolId),
    UnknownAssociatedType { protocol: String, name: String },
    UnknownGenericParam(GenericParamKey),
    /// A concrete type appeared where a type parameter is required.
    NotATypeParameter(Type),
    /// A concrete type nests deeper than the configured limit.
    ExcessiveNesting { ty: Type, limit: usize },
}

impl fmt::Display for RequirementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementError::ConcreteMismatch { lhs, rhs } => {
                write!(f, "concrete types {} and {} cannot be equal", lhs, rhs)
            }
            RequirementError::NonConformingConcreteType { ty, protocol } => {
                write!(f, "{} does not conform to {}", ty, protocol)
            }
            RequirementError::PackMismatch { lhs, rhs } => {
                write!(f, "pack and scalar parameters cannot be equal: {} == {}", lhs, rhs)
            }
            RequirementError::LayoutMismatch { ty, layout } => {
                write!(f, "{} cannot satisfy layout {}", ty, layout)
            }
            RequirementError::NotAClass(ty) => write!(f, "{} is not a class type", ty),
            RequirementError::UnknownProtocol(p) => write!(f, "unknown protocol {}", p),
            RequirementError::UnknownAssociatedType { protocol, name } => {
                write!(f, "{} has no associated type {}", protocol, name)
            }
            RequirementError::UnknownGenericParam(key) => write!(f, "unknown generic parameter {}", key),
            RequirementError::NotATypeParameter(ty) => write!(f, "{} is not a type parameter", ty),
            RequirementError::ExcessiveNesting { ty, limit } => {
                write!(f, "{} nests deeper than {} levels", ty, limit)
            }
        }
    }
}

impl std::error::Error for RequirementError {}

/// Failure to load, store or validate engine options.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Decode(serde_cbor::Error),
    /// A limit that must be positive was zero.
    InvalidLimit(&'static str),
    /// An unrecognized debug flag.
    UnknownDebugFlag(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "options I/O failed: {}", e),
            ConfigError::Decode(e) => write!(f, "options are not valid CBOR: {}", e),
            ConfigError::InvalidLimit(name) => write!(f, "limit {} must be positive", name),
            ConfigError::UnknownDebugFlag(flag) => write!(f, "unknown debug flag '{}'", flag),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_cbor::Error> for ConfigError {
    fn from(e: serde_cbor::Error) -> Self {
        ConfigError::Decode(e)
    }
}

/// A broken engine invariant. Never user-caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A rule LHS was inserted into the trie twice.
    DuplicateRuleLhs { lhs: String, existing: usize, new: usize },
    /// A path step does not match the term it is replayed against.
    PathStepMismatch { step: String, term: String },
    /// A step popped from an empty or too-shallow evaluator stack.
    EvaluatorStackUnderflow { step: String },
    /// The concrete-equivalence-class split retry did not converge.
    SplitRetryLimitExceeded { attempts: usize },
    /// A loop did not return to its basepoint with balanced stacks.
    UnbalancedLoop { basepoint: String, end: String },
    /// A stored rule is not oriented `lhs > rhs`.
    InvalidRuleOrientation { rule: usize },
    /// Minimization deleted a permanent rule.
    RedundantPermanentRule { rule: usize },
    /// Minimization ran on a machine that did not record loops.
    LoopsNotRecorded,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::DuplicateRuleLhs { lhs, existing, new } => {
                write!(f, "duplicate rule LHS {} (rule {} and rule {})", lhs, existing, new)
            }
            InvariantViolation::PathStepMismatch { step, term } => {
                write!(f, "step {} does not apply to {}", step, term)
            }
            InvariantViolation::EvaluatorStackUnderflow { step } => {
                write!(f, "evaluator stack underflow at {}", step)
            }
            InvariantViolation::SplitRetryLimitExceeded { attempts } => {
                write!(f, "concrete equivalence class splitting did not converge after {} attempts", attempts)
            }
            InvariantViolation::UnbalancedLoop { basepoint, end } => {
                write!(f, "loop at {} ended at {}", basepoint, end)
            }
            InvariantViolation::InvalidRuleOrientation { rule } => {
                write!(f, "rule {} is not oriented", rule)
            }
            InvariantViolation::RedundantPermanentRule { rule } => {
                write!(f, "permanent rule {} was marked redundant", rule)
            }
            InvariantViolation::LoopsNotRecorded => write!(f, "minimization needs recorded loops"),
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Aborts on a broken invariant after logging `dump`.
///
/// # Panics
/// Always.
#[cold]
#[track_caller]
pub fn fatal(violation: InvariantViolation, dump: &str) -> ! {
    tracing::error!(%violation, dump, "requirement machine invariant violated");
    panic!("requirement machine invariant violated: {}", violation)
}
