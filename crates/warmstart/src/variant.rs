//! Platform variant resolution
//!
//! A bundle ships pre-built assets for several platform variants (CPU
//! architectures). The host supplies the variants it can run, most preferred
//! first; the first one whose probe asset is present in the bundle wins.

use std::fmt;

use tracing::debug;

use crate::bundle::Bundle;
use crate::error::StartupError;

/// Token substituted with the resolved variant in asset and legacy paths.
pub const VARIANT_PLACEHOLDER: &str = "<variant>";

/// A resolved platform variant.
///
/// Resolved once per bootstrap and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant(String);

impl Variant {
    /// Wrap a variant identifier without probing.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The variant identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Replace every [`VARIANT_PLACEHOLDER`] in `template`.
    pub fn substitute(&self, template: &str) -> String {
        template.replace(VARIANT_PLACEHOLDER, &self.0)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Picks the variant to use by probing the bundle.
#[derive(Debug, Clone)]
pub struct VariantResolver {
    /// Probe asset path, containing [`VARIANT_PLACEHOLDER`].
    probe: String,
}

impl VariantResolver {
    /// Create a resolver for the given probe template.
    pub fn new(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
        }
    }

    /// The probe asset path for one candidate.
    pub fn probe_path(&self, candidate: &str) -> String {
        self.probe.replace(VARIANT_PLACEHOLDER, candidate)
    }

    /// Return the first candidate whose probe asset is in the bundle.
    ///
    /// Fails with `StartupError::UnsupportedPlatform` naming every candidate
    /// when none can.
    pub fn resolve<B, S>(&self, candidates: &[S], bundle: &B) -> Result<Variant, StartupError>
    where
        B: Bundle + ?Sized,
        S: AsRef<str>,
    {
        for candidate in candidates {
            let candidate = candidate.as_ref();
            let probe = self.probe_path(candidate);
            if bundle.exists(&probe) {
                debug!(variant = candidate, probe = %probe, "variant probe succeeded");
                return Ok(Variant::new(candidate));
            }
            debug!(variant = candidate, probe = %probe, "variant probe failed");
        }

        Err(StartupError::UnsupportedPlatform {
            attempted: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MemoryBundle;

    fn bundle_with(variants: &[&str]) -> MemoryBundle {
        let mut bundle = MemoryBundle::new();
        for v in variants {
            bundle.insert(&format!("assets/stdlib-{}.imy", v), "zip");
        }
        bundle
    }

    #[test]
    fn test_first_supported_candidate_wins() {
        let bundle = bundle_with(&["armeabi-v7a", "x86"]);
        let resolver = VariantResolver::new("assets/stdlib-<variant>.imy");

        let variant = resolver
            .resolve(&["arm64-v8a", "armeabi-v7a", "x86"], &bundle)
            .unwrap();
        assert_eq!(variant.as_str(), "armeabi-v7a");

        let variant = resolver.resolve(&["x86", "armeabi-v7a"], &bundle).unwrap();
        assert_eq!(variant.as_str(), "x86");
    }

    #[test]
    fn test_unsupported_names_all_candidates() {
        let bundle = bundle_with(&["x86_64"]);
        let resolver = VariantResolver::new("assets/stdlib-<variant>.imy");

        let err = resolver
            .resolve(&["arm64-v8a", "armeabi-v7a"], &bundle)
            .unwrap_err();
        match err {
            StartupError::UnsupportedPlatform { attempted } => {
                assert_eq!(attempted, vec!["arm64-v8a", "armeabi-v7a"]);
            }
            other => panic!("Expected UnsupportedPlatform, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_candidate_list() {
        let bundle = bundle_with(&["x86"]);
        let resolver = VariantResolver::new("stdlib-<variant>.imy");
        let empty: [&str; 0] = [];
        assert!(matches!(
            resolver.resolve(&empty, &bundle),
            Err(StartupError::UnsupportedPlatform { attempted }) if attempted.is_empty()
        ));
    }

    #[test]
    fn test_substitute() {
        let variant = Variant::new("x86");
        assert_eq!(variant.substitute("old-cache/<variant>"), "old-cache/x86");
        assert_eq!(variant.substitute("plain.zip"), "plain.zip");
        assert_eq!(variant.to_string(), "x86");
    }
}
