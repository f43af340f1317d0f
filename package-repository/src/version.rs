//! # Version Model
//!
//! Parsing, ordering and tier qualification for package versions.
//!
//! A version is up to four numeric components (`major.minor.patch.revision`),
//! an optional dot-separated prerelease label and optional build metadata:
//!
//! ```text
//! 1.2.3.4-beta.1+sha.5114f85
//! ```
//!
//! Build metadata never takes part in ordering, equality or hashing. It is kept
//! only so the original version can be shown back to users.
//!
//! ## Tiers
//!
//! Clients request packages under one of two [`CompatibilityTier`]s. The
//! [`CompatibilityTier::Legacy`] tier only sees versions with at most one
//! prerelease identifier and no build metadata; [`CompatibilityTier::Full`]
//! sees everything.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Maximum number of numeric components (`major.minor.patch.revision`).
const MAX_NUMERIC_COMPONENTS: usize = 4;

/// Errors produced while parsing a version string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Version string is empty")]
    Empty,

    #[error("Invalid numeric component '{component}' in version '{input}'")]
    InvalidNumericComponent { input: String, component: String },

    #[error("Version '{input}' has {count} numeric components (at most {MAX_NUMERIC_COMPONENTS} allowed)")]
    TooManyComponents { input: String, count: usize },

    #[error("Malformed prerelease label in version '{input}': {reason}")]
    InvalidPrerelease { input: String, reason: String },

    #[error("Malformed build metadata in version '{input}': {reason}")]
    InvalidMetadata { input: String, reason: String },
}

/// One dot-separated identifier of a prerelease label
#[derive(Debug, Clone)]
pub enum PrereleaseIdentifier {
    Numeric(u64),
    Alphanumeric(String),
}

impl PrereleaseIdentifier {
    fn parse(input: &str, identifier: &str) -> Result<Self, ParseError> {
        if identifier.is_empty() {
            return Err(ParseError::InvalidPrerelease {
                input: input.to_string(),
                reason: "empty identifier".to_string(),
            });
        }

        if !identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ParseError::InvalidPrerelease {
                input: input.to_string(),
                reason: format!("identifier '{identifier}' contains invalid characters"),
            });
        }

        if !identifier.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::Alphanumeric(identifier.to_string()));
        }

        if identifier.len() > 1 && identifier.starts_with('0') {
            return Err(ParseError::InvalidPrerelease {
                input: input.to_string(),
                reason: format!("numeric identifier '{identifier}' has a leading zero"),
            });
        }

        identifier
            .parse::<u64>()
            .map(Self::Numeric)
            .map_err(|_| ParseError::InvalidPrerelease {
                input: input.to_string(),
                reason: format!("numeric identifier '{identifier}' is out of range"),
            })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }
}

impl PartialEq for PrereleaseIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrereleaseIdentifier {}

impl PartialOrd for PrereleaseIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrereleaseIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Numeric(_), Self::Alphanumeric(_)) => Ordering::Less,
            (Self::Alphanumeric(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Alphanumeric(a), Self::Alphanumeric(b)) => a
                .bytes()
                .map(|b| b.to_ascii_lowercase())
                .cmp(b.bytes().map(|b| b.to_ascii_lowercase())),
        }
    }
}

impl Hash for PrereleaseIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Numeric(n) => {
                0u8.hash(state);
                n.hash(state);
            }
            Self::Alphanumeric(s) => {
                1u8.hash(state);
                s.to_ascii_lowercase().hash(state);
            }
        }
    }
}

impl fmt::Display for PrereleaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alphanumeric(s) => f.write_str(s),
        }
    }
}

/// Version-compatibility regime requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityTier {
    /// Older, restrictive scheme: single prerelease identifier, no metadata.
    Legacy,
    /// Complete semantic versioning.
    Full,
}

impl CompatibilityTier {
    pub const ALL: [CompatibilityTier; 2] = [CompatibilityTier::Legacy, CompatibilityTier::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityTier::Legacy => "legacy",
            CompatibilityTier::Full => "full",
        }
    }
}

impl fmt::Display for CompatibilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed package version.
///
/// Equality, ordering and hashing ignore build metadata and treat a missing
/// fourth component as `0`, so `1.0`, `1.0.0`, `1.0.0.0` and `1.0.0+build`
/// are all the same version.
#[derive(Debug, Clone)]
pub struct ParsedVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: Option<u64>,
    prerelease: Vec<PrereleaseIdentifier>,
    metadata: Option<String>,
}

impl ParsedVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: None,
            prerelease: Vec::new(),
            metadata: None,
        }
    }

    /// Parse a version string.
    ///
    /// # Examples
    ///
    /// ```
    /// # use package_repository::version::ParsedVersion;
    /// let v = ParsedVersion::parse("1.0-beta+build.7").unwrap();
    /// assert_eq!(v.to_normalized_string(), "1.0.0-beta");
    /// assert_eq!(v.metadata(), Some("build.7"));
    /// ```
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (rest, metadata) = match input.split_once('+') {
            Some((rest, meta)) => (rest, Some(parse_metadata(input, meta)?)),
            None => (input, None),
        };

        let (core, prerelease) = match rest.split_once('-') {
            Some((core, label)) => {
                let identifiers = label
                    .split('.')
                    .map(|id| PrereleaseIdentifier::parse(input, id))
                    .collect::<Result<Vec<_>, _>>()?;
                (core, identifiers)
            }
            None => (rest, Vec::new()),
        };

        let components: Vec<&str> = core.split('.').collect();
        if components.len() > MAX_NUMERIC_COMPONENTS {
            return Err(ParseError::TooManyComponents {
                input: input.to_string(),
                count: components.len(),
            });
        }

        let mut numbers = [0u64; MAX_NUMERIC_COMPONENTS];
        for (slot, component) in numbers.iter_mut().zip(&components) {
            if component.is_empty() || !component.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::InvalidNumericComponent {
                    input: input.to_string(),
                    component: component.to_string(),
                });
            }
            *slot = component
                .parse()
                .map_err(|_| ParseError::InvalidNumericComponent {
                    input: input.to_string(),
                    component: component.to_string(),
                })?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            revision: (components.len() == MAX_NUMERIC_COMPONENTS).then_some(numbers[3]),
            prerelease,
            metadata,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// The fourth (legacy) component, if one was written.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn prerelease(&self) -> &[PrereleaseIdentifier] {
        &self.prerelease
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Whether this version is visible to clients of the given tier.
    pub fn qualifies_for_tier(&self, tier: CompatibilityTier) -> bool {
        match tier {
            CompatibilityTier::Full => true,
            CompatibilityTier::Legacy => self.metadata.is_none() && self.prerelease.len() <= 1,
        }
    }

    /// Same version with build metadata removed.
    pub fn without_metadata(&self) -> Self {
        Self {
            metadata: None,
            ..self.clone()
        }
    }

    /// Canonical form used for display, paths and duplicate messages.
    ///
    /// The revision is only written when non-zero; build metadata is dropped.
    pub fn to_normalized_string(&self) -> String {
        let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if let Some(revision) = self.revision.filter(|r| *r > 0) {
            out.push_str(&format!(".{revision}"));
        }
        if !self.prerelease.is_empty() {
            out.push('-');
            out.push_str(&self.prerelease_label());
        }
        out
    }

    /// Normalized form plus `+metadata` when present.
    pub fn to_full_string(&self) -> String {
        match &self.metadata {
            Some(meta) => format!("{}+{meta}", self.to_normalized_string()),
            None => self.to_normalized_string(),
        }
    }

    pub fn prerelease_label(&self) -> String {
        self.prerelease
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    fn numeric_key(&self) -> (u64, u64, u64, u64) {
        (
            self.major,
            self.minor,
            self.patch,
            self.revision.unwrap_or(0),
        )
    }
}

fn parse_metadata(input: &str, metadata: &str) -> Result<String, ParseError> {
    if metadata.is_empty() {
        return Err(ParseError::InvalidMetadata {
            input: input.to_string(),
            reason: "metadata is empty".to_string(),
        });
    }

    for part in metadata.split('.') {
        if part.is_empty() {
            return Err(ParseError::InvalidMetadata {
                input: input.to_string(),
                reason: "empty identifier".to_string(),
            });
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ParseError::InvalidMetadata {
                input: input.to_string(),
                reason: format!("identifier '{part}' contains invalid characters"),
            });
        }
    }

    Ok(metadata.to_string())
}

/// Compare two versions, ignoring build metadata.
pub fn compare(a: &ParsedVersion, b: &ParsedVersion) -> Ordering {
    a.cmp(b)
}

impl PartialEq for ParsedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParsedVersion {}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric_key()
            .cmp(&other.numeric_key())
            .then_with(|| {
                match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                    (true, true) => Ordering::Equal,
                    // A release sorts above any prerelease of the same numbers.
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    // Slice ordering is lexicographic and puts a strict prefix first.
                    (false, false) => self.prerelease.as_slice().cmp(other.prerelease.as_slice()),
                }
            })
    }
}

impl Hash for ParsedVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numeric_key().hash(state);
        self.prerelease.hash(state);
    }
}

impl fmt::Display for ParsedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())
    }
}

impl FromStr for ParsedVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ParsedVersion {
        ParsedVersion::parse(s).unwrap_or_else(|e| panic!("failed to parse {s}: {e}"))
    }

    #[test]
    fn test_parse_components() {
        let version = v("1.2.3.4-beta.1+sha.abc");
        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 2);
        assert_eq!(version.patch(), 3);
        assert_eq!(version.revision(), Some(4));
        assert_eq!(version.prerelease_label(), "beta.1");
        assert_eq!(version.metadata(), Some("sha.abc"));
    }

    #[test]
    fn test_missing_components_default_to_zero() {
        assert_eq!(v("1"), v("1.0.0"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1.0.0"), v("1.0.0.0"));
        assert_eq!(v("1.0").to_normalized_string(), "1.0.0");
        assert_eq!(v("1.2.3.0").to_normalized_string(), "1.2.3");
        assert_eq!(v("1.2.3.7").to_normalized_string(), "1.2.3.7");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(ParsedVersion::parse(""), Err(ParseError::Empty));
        assert!(matches!(
            ParsedVersion::parse("a.b.c"),
            Err(ParseError::InvalidNumericComponent { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1..2"),
            Err(ParseError::InvalidNumericComponent { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.2.3.4.5"),
            Err(ParseError::TooManyComponents { count: 5, .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.0-"),
            Err(ParseError::InvalidPrerelease { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.0-beta..1"),
            Err(ParseError::InvalidPrerelease { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.0-be_ta"),
            Err(ParseError::InvalidPrerelease { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.0-01"),
            Err(ParseError::InvalidPrerelease { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse("1.0+"),
            Err(ParseError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            ParsedVersion::parse(" 1.0"),
            Err(ParseError::InvalidNumericComponent { .. })
        ));
    }

    #[test]
    fn test_metadata_is_ignored_for_equality_and_hashing() {
        use std::collections::HashSet;

        let a = v("1.0.0-beta.1+foo");
        let b = v("1.0.0-beta.1+bar");
        assert_eq!(a, b);
        assert_eq!(compare(&a, &b), Ordering::Equal);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_release_sorts_above_prerelease() {
        assert!(v("1.0.0") > v("1.0.0-rc"));
        assert!(v("1.0.0-rc") > v("0.9.9"));
        assert!(v("2.0.0-alpha") > v("1.9.9"));
    }

    #[test]
    fn test_prerelease_ordering() {
        let ordered = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_numeric_identifier_below_alphanumeric() {
        assert!(v("1.0.0-1") < v("1.0.0-a"));
        assert!(v("1.0.0-9") < v("1.0.0-0test"));
    }

    #[test]
    fn test_prerelease_comparison_ignores_case() {
        assert_eq!(v("1.0.0-Beta"), v("1.0.0-beta"));
        assert_eq!(v("1.0.0-Beta").prerelease_label(), "Beta");
    }

    #[test]
    fn test_tier_qualification() {
        assert!(v("1.0").qualifies_for_tier(CompatibilityTier::Legacy));
        assert!(v("1.0-beta").qualifies_for_tier(CompatibilityTier::Legacy));
        assert!(v("1.0.0.1-beta").qualifies_for_tier(CompatibilityTier::Legacy));
        assert!(!v("1.0-beta.1").qualifies_for_tier(CompatibilityTier::Legacy));
        assert!(!v("1.0-beta+foo").qualifies_for_tier(CompatibilityTier::Legacy));
        assert!(!v("3.2.0+taggedOnly").qualifies_for_tier(CompatibilityTier::Legacy));

        for s in ["1.0", "1.0-beta", "1.0-beta.1", "1.0-beta+foo"] {
            assert!(v(s).qualifies_for_tier(CompatibilityTier::Full));
        }
    }

    #[test]
    fn test_display_strings() {
        let version = v("3.2.0+taggedOnly");
        assert_eq!(version.to_string(), "3.2.0");
        assert_eq!(version.to_full_string(), "3.2.0+taggedOnly");
        assert_eq!(version.without_metadata().metadata(), None);
        assert_eq!(v("2.4.0-prerel").to_string(), "2.4.0-prerel");
    }
}
