//! Diagnostic sink interface.
//!
//! The engine never formats user-facing prose. It hands the caller a
//! location, a kind and a payload (a rule or term dump) through a
//! `DiagnosticSink` injected at construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque source location supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLoc(pub u32);

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A written requirement is implied by the others.
    RedundantRequirement,
    /// A requirement conflicts with another one.
    ConflictingRequirement,
    /// Completion hit its iteration or depth limit.
    CompletionFailed,
    /// A requirement could not be turned into a rule.
    InvalidRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub loc: SourceLoc,
    pub kind: DiagnosticKind,
    /// Rule, term or requirement dump used as the message argument.
    pub payload: String,
}

/// Receiver of engine diagnostics.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Sink that stores everything it receives, in emission order.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics of one kind.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _diagnostic: Diagnostic) {}
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &mut S {
    fn emit(&mut self, diagnostic: Diagnostic) {
        (**self).emit(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_filters_by_kind() {
        let mut sink = CollectingSink::new();
        sink.emit(Diagnostic {
            loc: SourceLoc(1),
            kind: DiagnosticKind::RedundantRequirement,
            payload: "τ_0_0.[P] => τ_0_0".into(),
        });
        sink.emit(Diagnostic {
            loc: SourceLoc(2),
            kind: DiagnosticKind::CompletionFailed,
            payload: String::new(),
        });
        assert_eq!(sink.of_kind(DiagnosticKind::CompletionFailed).count(), 1);
        assert_eq!(sink.diagnostics[0].loc.to_string(), "@1");
    }

    #[test]
    fn test_sink_by_mutable_reference() {
        fn emit_into<S: DiagnosticSink>(mut sink: S) {
            sink.emit(Diagnostic {
                loc: SourceLoc::default(),
                kind: DiagnosticKind::InvalidRequirement,
                payload: "x".into(),
            });
        }
        let mut sink = CollectingSink::new();
        emit_into(&mut sink);
        emit_into(NullSink);
        assert_eq!(sink.diagnostics.len(), 1);
    }
}
