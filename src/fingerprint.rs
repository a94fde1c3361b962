//! Deterministic fingerprints of signatures and rule sets.
//!
//! Values are encoded into a tagged, length-prefixed byte string and hashed
//! with SHA-256 under a per-use domain tag, so equal fingerprints across
//! fresh builds mean equal content. Nothing here depends on interning
//! order: rules are encoded through their printed terms.
//!
//! # Citations
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation & length prefixing: Bernstein et al., "How to hash into elliptic curves" (2009)

use crate::context::RewriteContext;
use crate::requirement::{Requirement, Type};
use crate::rule::Rule;
use crate::signature::GenericParamDecl;
use crate::symbol::{LayoutConstraint, ProtocolId};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix of every hashed message.
const TAG: &[u8] = b"reqmachine.fingerprint";

const GENERIC_SIGNATURE: &[u8] = b"generic-signature";
const REQUIREMENT_SIGNATURE: &[u8] = b"requirement-signature";
const RULE_SET: &[u8] = b"rule-set";

/// A SHA-256 fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashValue([u8; 32]);

impl HashValue {
    /// Hashes `TAG || 0 || domain || 0 || len(data) as u64 LE || data`.
    fn digest(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(TAG);
        hasher.update([0]);
        hasher.update(domain);
        hasher.update([0]);
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

/// The first eight bytes in hex.
impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0[..8].iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

/// Append-only canonical encoder.
///
/// Every value is a one-byte tag followed by fixed-width little-endian
/// integers or length-prefixed bytes, so distinct values never share an
/// encoding.
#[derive(Debug, Default)]
struct CanonicalBytes {
    buf: Vec<u8>,
}

impl CanonicalBytes {
    fn tag(&mut self, tag: u8) -> &mut Self {
        self.buf.push(tag);
        self
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Length prefix of a sequence.
    fn count(&mut self, len: usize) -> &mut Self {
        self.buf.extend_from_slice(&(len as u64).to_le_bytes());
        self
    }

    fn str(&mut self, value: &str) -> &mut Self {
        self.count(value.len());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    fn finish(&self, domain: &[u8]) -> HashValue {
        HashValue::digest(domain, &self.buf)
    }
}

fn encode_type(out: &mut CanonicalBytes, ty: &Type) {
    match ty {
        Type::Param(key) => {
            out.tag(0).u32(key.depth).u32(key.index);
        }
        Type::Member { base, name, protocol } => {
            out.tag(1);
            encode_type(out, base);
            out.str(name);
            match protocol {
                Some(p) => out.tag(1).u32(p.0),
                None => out.tag(0),
            };
        }
        Type::Nominal { name, args } => {
            out.tag(2).str(name).count(args.len());
            for arg in args {
                encode_type(out, arg);
            }
        }
    }
}

fn encode_layout(out: &mut CanonicalBytes, layout: LayoutConstraint) {
    match layout {
        LayoutConstraint::Class => out.tag(0),
        LayoutConstraint::NativeClass => out.tag(1),
        LayoutConstraint::Trivial => out.tag(2),
        LayoutConstraint::TrivialOfSize(bits) => out.tag(3).u32(bits),
    };
}

fn encode_requirement(out: &mut CanonicalBytes, requirement: &Requirement) {
    match requirement {
        Requirement::Conformance { subject, protocol } => {
            out.tag(0);
            encode_type(out, subject);
            out.u32(protocol.0);
        }
        Requirement::SameType { first, second } => {
            out.tag(1);
            encode_type(out, first);
            encode_type(out, second);
        }
        Requirement::Superclass { subject, superclass } => {
            out.tag(2);
            encode_type(out, subject);
            encode_type(out, superclass);
        }
        Requirement::Layout { subject, layout } => {
            out.tag(3);
            encode_type(out, subject);
            encode_layout(out, *layout);
        }
    }
}

/// Fingerprint of a generic signature: parameters, then requirements in
/// the given order.
pub fn generic_signature_fingerprint(params: &[GenericParamDecl], requirements: &[Requirement]) -> HashValue {
    let mut out = CanonicalBytes::default();
    out.count(params.len());
    for param in params {
        out.u32(param.key.depth).u32(param.key.index).tag(param.is_pack as u8);
    }
    out.count(requirements.len());
    for requirement in requirements {
        encode_requirement(&mut out, requirement);
    }
    out.finish(GENERIC_SIGNATURE)
}

pub fn requirement_signature_fingerprint(protocol: ProtocolId, requirements: &[Requirement]) -> HashValue {
    let mut out = CanonicalBytes::default();
    out.u32(protocol.0).count(requirements.len());
    for requirement in requirements {
        encode_requirement(&mut out, requirement);
    }
    out.finish(REQUIREMENT_SIGNATURE)
}

/// Fingerprint of a rule set, sensitive to rule order and to the
/// permanent, explicit, redundant and conflicting flags.
pub fn rule_set_fingerprint<'a>(ctx: &RewriteContext, rules: impl Iterator<Item = &'a Rule>) -> HashValue {
    let mut out = CanonicalBytes::default();
    for rule in rules {
        let flags = rule.flags();
        out.str(&ctx.format_term(ctx.term(rule.lhs())))
            .str(&ctx.format_term(ctx.term(rule.rhs())))
            .tag(flags.permanent as u8)
            .tag(flags.explicit as u8)
            .tag(flags.redundant as u8)
            .tag(flags.conflicting as u8);
    }
    out.finish(RULE_SET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separation() {
        let a = HashValue::digest(b"A", b"payload");
        let b = HashValue::digest(b"B", b"payload");
        assert_ne!(a, b);
        assert_eq!(a, HashValue::digest(b"A", b"payload"));
        assert_ne!(HashValue::digest(b"AB", b"C"), HashValue::digest(b"A", b"BC"));
    }

    #[test]
    fn test_length_prefix_separates_strings() {
        let mut ab = CanonicalBytes::default();
        ab.str("ab").str("c");
        let mut a = CanonicalBytes::default();
        a.str("a").str("bc");
        assert_ne!(ab.finish(RULE_SET), a.finish(RULE_SET));
    }

    #[test]
    fn test_generic_signature_fingerprint_depends_on_order() {
        let t0 = Type::param(0, 0);
        let t1 = Type::param(0, 1);
        let params = [GenericParamDecl::new(0, 0), GenericParamDecl::new(0, 1)];
        let r1 = Requirement::conformance(t0.clone(), ProtocolId(0));
        let r2 = Requirement::same_type(t1, t0);
        let fwd = generic_signature_fingerprint(&params, &[r1.clone(), r2.clone()]);
        let rev = generic_signature_fingerprint(&params, &[r2, r1.clone()]);
        assert_ne!(fwd, rev);
        assert_eq!(fwd, generic_signature_fingerprint(&params, &[r1, Requirement::same_type(Type::param(0, 1), Type::param(0, 0))]));
    }

    #[test]
    fn test_pack_flag_changes_fingerprint() {
        let scalar = generic_signature_fingerprint(&[GenericParamDecl::new(0, 0)], &[]);
        let pack = generic_signature_fingerprint(&[GenericParamDecl::pack(0, 0)], &[]);
        assert_ne!(scalar, pack);
    }

    #[test]
    fn test_display_is_short_hex() {
        let h = requirement_signature_fingerprint(ProtocolId(0), &[]);
        let shown = h.to_string();
        assert_eq!(shown.len(), 16);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(shown, requirement_signature_fingerprint(ProtocolId(1), &[]).to_string());
    }
}
