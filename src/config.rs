//! Engine options.
//!
//! Limits are counters, never wall-clock time. Options are plain serde data
//! so a driver can hand the engine a stored CBOR blob.

use crate::debug::DebugOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Completion limits, checked by `RewriteSystem::complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionLimits {
    pub max_iterations: usize,
    pub max_depth: usize,
}

/// Options shared by every machine an engine builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Critical pairs processed before completion gives up.
    pub max_iterations: usize,
    /// Largest rule depth (LHS length minus one) completion may create.
    pub max_depth: usize,
    /// Split-and-rebuild attempts per generic signature. Zero forbids
    /// splitting altogether.
    pub max_split_attempts: usize,
    /// Deepest concrete type accepted in a requirement or type witness.
    pub max_concrete_nesting: usize,
    /// Merge `[P1:T]` and `[P2:T]` when proven equal. Only applies to
    /// machines that do not record loops.
    pub merge_associated_types: bool,
    pub debug: DebugOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            max_depth: 12,
            max_split_attempts: 16,
            max_concrete_nesting: 30,
            merge_associated_types: true,
            debug: DebugOptions::NONE,
        }
    }
}

impl EngineOptions {
    /// Rejects zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidLimit("max_iterations"));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidLimit("max_depth"));
        }
        if self.max_concrete_nesting == 0 {
            return Err(ConfigError::InvalidLimit("max_concrete_nesting"));
        }
        Ok(())
    }

    pub fn limits(&self) -> CompletionLimits {
        CompletionLimits {
            max_iterations: self.max_iterations,
            max_depth: self.max_depth,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Decodes and validates options.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ConfigError> {
        let options: EngineOptions = serde_cbor::from_slice(bytes)?;
        options.validate()?;
        Ok(options)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_cbor()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_cbor(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = EngineOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_depth, 12);
        assert!(options.merge_associated_types);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let options = EngineOptions {
            max_iterations: 0,
            ..EngineOptions::default()
        };
        assert!(matches!(options.validate(), Err(ConfigError::InvalidLimit("max_iterations"))));
        let options = EngineOptions {
            max_split_attempts: 0,
            ..EngineOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.cbor");
        let options = EngineOptions {
            max_depth: 7,
            debug: DebugOptions::parse("rules").unwrap(),
            ..EngineOptions::default()
        };
        options.save(&path).unwrap();
        assert_eq!(EngineOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cbor");
        std::fs::write(&path, b"\xff\x00not cbor").unwrap();
        assert!(EngineOptions::load(&path).is_err());
        assert!(matches!(
            EngineOptions::load(&dir.path().join("missing.cbor")),
            Err(ConfigError::Io(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_cbor_preserves_limits(iters in 1usize..100_000, depth in 1usize..64, splits in 0usize..32) {
            let options = EngineOptions {
                max_iterations: iters,
                max_depth: depth,
                max_split_attempts: splits,
                ..EngineOptions::default()
            };
            let bytes = options.to_cbor().unwrap();
            prop_assert_eq!(EngineOptions::from_cbor(&bytes).unwrap(), options);
        }
    }
}
