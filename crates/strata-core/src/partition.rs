//! Versioned partition naming
//!
//! Storage names have the form `{prefix}-{version}-{partition}`. Bumping the
//! version therefore addresses a fresh set of partitions, and activation
//! drops every partition of the app that does not carry the current version.

/// Logical name of the partition holding precached assets
pub const STATIC_PARTITION: &str = "static";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNamer {
    prefix: String,
    version: String,
}

impl PartitionNamer {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Storage name of a logical partition for the current version
    pub fn storage_name(&self, partition: &str) -> String {
        format!("{}-{}-{}", self.prefix, self.version, partition)
    }

    pub fn static_partition(&self) -> String {
        self.storage_name(STATIC_PARTITION)
    }

    /// Whether a stored partition was created by this app (any version)
    pub fn belongs_to_app(&self, name: &str) -> bool {
        belongs_to_prefix(&self.prefix, name)
    }

    /// Whether a stored partition carries the current version.
    ///
    /// The version is matched as a whole `-{version}-` segment so that `v1`
    /// never matches `v10`.
    pub fn is_current(&self, name: &str) -> bool {
        self.belongs_to_app(name) && name.contains(&format!("-{}-", self.version))
    }

    /// Partitions left behind by another version of this app
    pub fn is_stale(&self, name: &str) -> bool {
        self.belongs_to_app(name) && !self.is_current(name)
    }

    /// Accept either a full storage name or a logical partition name
    pub fn resolve(&self, name: &str) -> String {
        if self.belongs_to_app(name) {
            name.to_string()
        } else {
            self.storage_name(name)
        }
    }
}

pub(crate) fn belongs_to_prefix(prefix: &str, name: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_name() {
        let names = PartitionNamer::new("focus", "v3");
        assert_eq!(names.storage_name("api"), "focus-v3-api");
        assert_eq!(names.static_partition(), "focus-v3-static");
    }

    #[test]
    fn test_version_segment_is_exact() {
        let names = PartitionNamer::new("focus", "v1");
        assert!(names.is_current("focus-v1-static"));
        assert!(!names.is_current("focus-v10-static"));
        assert!(names.is_stale("focus-v10-static"));
        assert!(names.is_stale("focus-v0-api"));
    }

    #[test]
    fn test_foreign_partitions_are_never_stale() {
        let names = PartitionNamer::new("focus", "v2");
        assert!(!names.belongs_to_app("focused-v1-static"));
        assert!(!names.is_stale("other-v1-static"));
        assert!(!names.is_stale("focused-v1-static"));
    }

    #[test]
    fn test_resolve() {
        let names = PartitionNamer::new("focus", "v2");
        assert_eq!(names.resolve("dynamic"), "focus-v2-dynamic");
        assert_eq!(names.resolve("focus-v1-dynamic"), "focus-v1-dynamic");
    }
}
