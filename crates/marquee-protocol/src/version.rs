//! Device profile versioning.
//!
//! Each [`DeviceProfile`](crate::profile::DeviceProfile) carries the
//! firmware protocol revision its constants were captured from.

/// Revision of the reference 96x20 panel firmware protocol.
pub const PROFILE_VERSION: ProfileVersion = ProfileVersion { major: 1, minor: 0 };

/// Profile version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileVersion {
    /// Major version - a different packet layout increments this.
    pub major: u8,
    /// Minor version - new constants with the same layout increment this.
    pub minor: u8,
}

impl ProfileVersion {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if packets built for `other` can be parsed with this layout.
    ///
    /// Layouts are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &ProfileVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for ProfileVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl Default for ProfileVersion {
    fn default() -> Self {
        PROFILE_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = ProfileVersion::new(1, 0);
        let v1_1 = ProfileVersion::new(1, 1);
        let v2_0 = ProfileVersion::new(2, 0);

        assert!(v1_0.is_compatible_with(&v1_1));
        assert!(!v1_0.is_compatible_with(&v2_0));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProfileVersion::new(1, 2).to_string(), "v1.2");
    }
}
