//! Symbols: the alphabet of the rewrite system.
//!
//! A symbol is one atomic marker inside a term. Type-parameter structure is
//! spelled with `GenericParam`, `Name` and `AssociatedType` symbols; the
//! remaining kinds are *property* symbols that only ever appear at the end of
//! a term, where a rule `X.[prop] => X` states that the type parameter `X`
//! has the property.
//!
//! Concrete types never appear in terms directly. A concrete-like symbol
//! stores a `TypePattern` whose `Placeholder(i)` leaves stand for the
//! `i`-th entry of the symbol's substitution list, which holds terms.
//!
//! # Citations
//! - Book & Otto, "String-Rewriting Systems" (1993), ch. 2: alphabets and words
//! - Pestov, "Requirement Machine" design notes (2021): property symbols

use crate::arena::TermId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a protocol declaration.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(pub u32);

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolId({})", self.0)
    }
}

/// Position of a generic parameter: `τ_depth_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenericParamKey {
    /// Nesting depth of the generic context that declares the parameter.
    pub depth: u32,
    /// Index within its generic parameter list.
    pub index: u32,
}

impl GenericParamKey {
    /// Creates a key for `τ_depth_index`.
    pub const fn new(depth: u32, index: u32) -> Self {
        Self { depth, index }
    }

    /// The implicit `Self` parameter of a protocol.
    pub const SELF: GenericParamKey = GenericParamKey { depth: 0, index: 0 };
}

impl fmt::Display for GenericParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "τ_{}_{}", self.depth, self.index)
    }
}

/// Layout constraints a type parameter can be subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayoutConstraint {
    /// Any class type (`AnyObject`).
    Class,
    /// A class with native reference counting.
    NativeClass,
    /// A trivially copyable type.
    Trivial,
    /// A trivially copyable type of exactly this many bits.
    TrivialOfSize(u32),
}

impl LayoutConstraint {
    /// Returns `true` if every type satisfying `self` satisfies `other`.
    pub fn implies(self, other: LayoutConstraint) -> bool {
        if self == other {
            return true;
        }
        matches!(
            (self, other),
            (LayoutConstraint::NativeClass, LayoutConstraint::Class)
                | (LayoutConstraint::TrivialOfSize(_), LayoutConstraint::Trivial)
        )
    }

    /// Returns `true` if some type can satisfy both constraints.
    pub fn is_compatible_with(self, other: LayoutConstraint) -> bool {
        self.implies(other) || other.implies(self)
    }

    /// Returns `true` for the reference-counted layouts.
    pub fn is_class(self) -> bool {
        matches!(self, LayoutConstraint::Class | LayoutConstraint::NativeClass)
    }
}

impl fmt::Display for LayoutConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutConstraint::Class => write!(f, "AnyObject"),
            LayoutConstraint::NativeClass => write!(f, "_NativeClass"),
            LayoutConstraint::Trivial => write!(f, "_Trivial"),
            LayoutConstraint::TrivialOfSize(bits) => write!(f, "_Trivial({})", bits),
        }
    }
}

/// Shape of a concrete type with its type-parameter leaves abstracted.
///
/// `Array<Dictionary<σ0, Int>>` is
/// `Nominal { "Array", [Nominal { "Dictionary", [Placeholder(0), Nominal { "Int", [] }] }] }`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypePattern {
    /// De Bruijn-style placeholder for substitution `i`.
    Placeholder(u32),
    /// A nominal type applied to generic arguments.
    Nominal {
        /// Declared name of the nominal type.
        name: String,
        /// Generic arguments, in declaration order.
        args: Vec<TypePattern>,
    },
}

impl TypePattern {
    /// Shorthand for a nominal pattern.
    pub fn nominal(name: impl Into<String>, args: Vec<TypePattern>) -> Self {
        TypePattern::Nominal {
            name: name.into(),
            args,
        }
    }

    /// Name of the outermost nominal type, if the pattern is not a bare placeholder.
    pub fn nominal_name(&self) -> Option<&str> {
        match self {
            TypePattern::Nominal { name, .. } => Some(name),
            TypePattern::Placeholder(_) => None,
        }
    }

    /// Generic arguments of the outermost nominal type.
    pub fn args(&self) -> &[TypePattern] {
        match self {
            TypePattern::Nominal { args, .. } => args,
            TypePattern::Placeholder(_) => &[],
        }
    }

    /// Placeholder indices in pre-order, with repetitions.
    pub fn placeholders(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect_placeholders(&mut out);
        out
    }

    fn collect_placeholders(&self, out: &mut Vec<u32>) {
        match self {
            TypePattern::Placeholder(i) => out.push(*i),
            TypePattern::Nominal { args, .. } => {
                for arg in args {
                    arg.collect_placeholders(out);
                }
            }
        }
    }

    /// Replaces every placeholder by the pattern `f` returns for it.
    pub fn substitute(&self, f: &mut dyn FnMut(u32) -> TypePattern) -> TypePattern {
        match self {
            TypePattern::Placeholder(i) => f(*i),
            TypePattern::Nominal { name, args } => TypePattern::Nominal {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(f)).collect(),
            },
        }
    }

    /// Returns `true` if the pattern contains no placeholder.
    pub fn is_fully_concrete(&self) -> bool {
        match self {
            TypePattern::Placeholder(_) => false,
            TypePattern::Nominal { args, .. } => args.iter().all(|a| a.is_fully_concrete()),
        }
    }

    /// Nesting depth of nominal applications.
    pub fn nesting_depth(&self) -> usize {
        match self {
            TypePattern::Placeholder(_) => 0,
            TypePattern::Nominal { args, .. } => {
                1 + args.iter().map(|a| a.nesting_depth()).max().unwrap_or(0)
            }
        }
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypePattern::Placeholder(i) => write!(f, "σ{}", i),
            TypePattern::Nominal { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
        }
    }
}

/// Kinds of symbols, declared in reduction-order rank (smallest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolKind {
    Protocol,
    AssociatedType,
    GenericParam,
    Name,
    Layout,
    Superclass,
    ConcreteType,
    ConcreteConformance,
}

/// One atomic marker of a term.
///
/// Structural equality and hashing are derived so the value can be interned;
/// the reduction order lives in `RewriteContext::compare_symbols` because it
/// depends on protocol ranks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A generic parameter `τ_d_i`; only ever the first symbol of a term.
    GenericParam(GenericParamKey),
    /// An unresolved member type name.
    Name(String),
    /// `[P]`: conformance to `P`, or the `Self` root of a protocol-domain term.
    Protocol(ProtocolId),
    /// `[P:A]`, or the merged `[P1&P2:A]` when more than one protocol is listed.
    AssociatedType {
        /// Protocols in protocol order; never empty.
        protocols: Vec<ProtocolId>,
        /// Associated type name.
        name: String,
    },
    /// `[layout: L]`.
    Layout(LayoutConstraint),
    /// `[superclass: C]`.
    Superclass {
        pattern: TypePattern,
        substitutions: Vec<TermId>,
    },
    /// `[concrete: C]`.
    ConcreteType {
        pattern: TypePattern,
        substitutions: Vec<TermId>,
    },
    /// `[concrete: C : P]`.
    ConcreteConformance {
        pattern: TypePattern,
        substitutions: Vec<TermId>,
        protocol: ProtocolId,
    },
}

impl Symbol {
    /// Returns the kind tag.
    pub fn kind(&self) -> SymbolKind {
        match self {
            Symbol::GenericParam(_) => SymbolKind::GenericParam,
            Symbol::Name(_) => SymbolKind::Name,
            Symbol::Protocol(_) => SymbolKind::Protocol,
            Symbol::AssociatedType { .. } => SymbolKind::AssociatedType,
            Symbol::Layout(_) => SymbolKind::Layout,
            Symbol::Superclass { .. } => SymbolKind::Superclass,
            Symbol::ConcreteType { .. } => SymbolKind::ConcreteType,
            Symbol::ConcreteConformance { .. } => SymbolKind::ConcreteConformance,
        }
    }

    /// Property symbols may only appear as the last symbol of a term.
    pub fn is_property(&self) -> bool {
        matches!(
            self.kind(),
            SymbolKind::Protocol
                | SymbolKind::Layout
                | SymbolKind::Superclass
                | SymbolKind::ConcreteType
                | SymbolKind::ConcreteConformance
        )
    }

    /// Returns the pattern of a concrete-like symbol.
    pub fn pattern(&self) -> Option<&TypePattern> {
        match self {
            Symbol::Superclass { pattern, .. }
            | Symbol::ConcreteType { pattern, .. }
            | Symbol::ConcreteConformance { pattern, .. } => Some(pattern),
            _ => None,
        }
    }

    /// Returns the substitutions of a concrete-like symbol.
    pub fn substitutions(&self) -> Option<&[TermId]> {
        match self {
            Symbol::Superclass { substitutions, .. }
            | Symbol::ConcreteType { substitutions, .. }
            | Symbol::ConcreteConformance { substitutions, .. } => Some(substitutions),
            _ => None,
        }
    }

    /// Returns a copy with the substitution list replaced.
    ///
    /// Symbols without substitutions are returned unchanged.
    pub fn with_substitutions(&self, new_substitutions: Vec<TermId>) -> Symbol {
        match self {
            Symbol::Superclass { pattern, .. } => Symbol::Superclass {
                pattern: pattern.clone(),
                substitutions: new_substitutions,
            },
            Symbol::ConcreteType { pattern, .. } => Symbol::ConcreteType {
                pattern: pattern.clone(),
                substitutions: new_substitutions,
            },
            Symbol::ConcreteConformance {
                pattern, protocol, ..
            } => Symbol::ConcreteConformance {
                pattern: pattern.clone(),
                substitutions: new_substitutions,
                protocol: *protocol,
            },
            other => other.clone(),
        }
    }

    /// Protocol of a `Protocol` or `ConcreteConformance` symbol.
    pub fn protocol(&self) -> Option<ProtocolId> {
        match self {
            Symbol::Protocol(p) => Some(*p),
            Symbol::ConcreteConformance { protocol, .. } => Some(*protocol),
            _ => None,
        }
    }

    /// Returns `true` for symbols that carry substitutions.
    pub fn has_substitutions(&self) -> bool {
        self.substitutions().is_some()
    }
}
