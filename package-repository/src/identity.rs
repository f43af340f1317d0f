//! Package identity: a case-insensitive id paired with a [`ParsedVersion`].

use crate::validation::{validate_package_id, validate_version_text};
use crate::version::ParsedVersion;
use crate::{RepositoryError, RepositoryResult};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of one package version.
///
/// Ids compare case-insensitively and versions compare without build
/// metadata, so `Foo 1.0.0+a` and `foo 1.0.0+b` are the same identity. The
/// original id casing and the metadata are kept for display.
#[derive(Debug, Clone)]
pub struct PackageIdentity {
    id: String,
    version: ParsedVersion,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: ParsedVersion) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Validate and parse a raw `(id, version)` pair as read from a manifest.
    pub fn parse(id: &str, version: &str) -> RepositoryResult<Self> {
        validate_package_id(id)?;
        validate_version_text(version)?;
        let version = ParsedVersion::parse(version)?;
        Ok(Self::new(id, version))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &ParsedVersion {
        &self.version
    }

    /// Lookup key for the id.
    pub fn id_key(&self) -> String {
        normalize_id(&self.id)
    }

    /// Whether `id` names this package (case-insensitive).
    pub fn matches_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    /// The `Id.NormalizedVersion` form used in user-facing messages.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.id, self.version.to_normalized_string())
    }
}

/// Normalize a package id for use as a map key.
pub fn normalize_id(id: &str) -> String {
    id.to_ascii_lowercase()
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.matches_id(&other.id) && self.version == other.version
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id_key().hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl From<(&str, ParsedVersion)> for PackageIdentity {
    fn from((id, version): (&str, ParsedVersion)) -> Self {
        Self::new(id, version)
    }
}

impl TryFrom<(&str, &str)> for PackageIdentity {
    type Error = RepositoryError;

    fn try_from((id, version): (&str, &str)) -> Result<Self, Self::Error> {
        Self::parse(id, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_identity_equality_ignores_case_and_metadata() {
        let a = PackageIdentity::parse("Foo", "1.0.0-beta.1+foo").unwrap();
        let b = PackageIdentity::parse("foo", "1.0.0-beta.1+bar").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id_key(), b.id_key());
        assert_eq!(a.id(), "Foo");
        assert_eq!(a.version().metadata(), Some("foo"));
    }

    #[test]
    fn test_display_name_strips_metadata() {
        let identity = PackageIdentity::parse("Foo", "1.0.0-beta.1+foo").unwrap();
        assert_eq!(identity.display_name(), "Foo.1.0.0-beta.1");
        assert_eq!(identity.to_string(), "Foo.1.0.0-beta.1");

        let identity = PackageIdentity::parse("Not5", "4.0").unwrap();
        assert_eq!(identity.display_name(), "Not5.4.0.0");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = PackageIdentity::parse("../etc", "1.0").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);

        let err = PackageIdentity::parse("foo", "not-a-version").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
    }
}
