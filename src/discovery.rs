//! Test discovery traits and the test identity model.
//!
//! This module defines what a test *is* for the rest of the crate and the
//! interface through which tests are obtained. Discovery itself is a
//! platform concern: a vendor integration knows how to list the tests inside
//! an instrumentation binary or an app bundle. The engine only consumes the
//! resulting list of [`TestCase`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     TestParser                        │
//! │                                                       │
//! │  extract(&source) ──────────► Vec<TestCase>          │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Parsers
//!
//! | Parser | Source | Use case |
//! |--------|--------|----------|
//! | [`manifest::ManifestTestParser`] | JSON manifest file | CLI runs, fixtures |
//!
//! Platform vendors supply their own [`TestParser`] implementations; the
//! manifest parser exists so the crate is usable end-to-end without one.

pub mod manifest;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur while obtaining the test list.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The test source could not be read or interrogated.
    #[error("Failed to discover tests: {0}")]
    SourceUnreadable(String),

    /// The test source was read but its contents could not be interpreted.
    #[error("Failed to parse test list: {0}")]
    ParseError(String),

    /// I/O error reading the test source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other discovery-related errors.
    #[error("Discovery error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Reference to the component under test.
///
/// A component is the unit the platform installs and exercises — an app
/// bundle, an APK pair, a test target. Batches never mix tests from
/// different components, so the engine carries this reference around
/// opaquely and groups by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentRef(pub String);

impl ComponentRef {
    /// Creates a component reference from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single test, identified by package, class and method.
///
/// Equality and hashing consider only the identity fields
/// (`package`/`class`/`method`) — two instances that differ only in
/// metadata refer to the same test. The engine relies on this when counting
/// attempts across repeated executions of the same test.
///
/// # Example
///
/// ```
/// use stampede::discovery::{ComponentRef, TestCase};
///
/// let test = TestCase::new("com.example", "LoginTest", "happyPath", ComponentRef::new("app"))
///     .with_metadata("smoke");
///
/// assert_eq!(test.fully_qualified_name(), "com.example.LoginTest#happyPath");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Package (or namespace) the test class lives in.
    pub package: String,

    /// Test class name.
    pub class: String,

    /// Test method name.
    pub method: String,

    /// Ordered metadata tags attached to the test (annotations, markers).
    #[serde(default)]
    pub metadata: Vec<String>,

    /// The component this test exercises.
    pub component: ComponentRef,
}

impl TestCase {
    /// Creates a new test case.
    pub fn new(
        package: impl Into<String>,
        class: impl Into<String>,
        method: impl Into<String>,
        component: ComponentRef,
    ) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
            method: method.into(),
            metadata: Vec::new(),
            component,
        }
    }

    /// Adds a metadata tag. Can be chained.
    pub fn with_metadata(mut self, tag: impl Into<String>) -> Self {
        self.metadata.push(tag.into());
        self
    }

    /// Returns `true` if the test carries the given metadata tag.
    pub fn has_metadata(&self, tag: &str) -> bool {
        self.metadata.iter().any(|t| t == tag)
    }

    /// The canonical `package.Class#method` name of this test.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}#{}", self.package, self.class, self.method)
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.package == other.package && self.class == other.class && self.method == other.method
    }
}

impl Eq for TestCase {}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.package.hash(state);
        self.class.hash(state);
        self.method.hash(state);
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}#{}", self.package, self.class, self.method)
    }
}

/// Trait for obtaining the list of tests to run.
///
/// Implementations interrogate a platform-specific test source — an
/// instrumentation binary, an app bundle, a manifest file — and return the
/// flat list of tests the engine will distribute.
///
/// # Thread Safety
///
/// Parsers must be `Send + Sync` so they can be shared across async tasks.
#[async_trait]
pub trait TestParser: Send + Sync {
    /// Extracts the test list from the given source.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::SourceUnreadable`] if the source cannot be read
    /// - [`DiscoveryError::ParseError`] if the contents are malformed
    async fn extract(&self, source: &Path) -> DiscoveryResult<Vec<TestCase>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_metadata() {
        let component = ComponentRef::new("app");
        let a = TestCase::new("com.example", "FooTest", "bar", component.clone());
        let b = TestCase::new("com.example", "FooTest", "bar", component).with_metadata("flaky");

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_fully_qualified_name() {
        let test = TestCase::new("com.example", "FooTest", "bar", ComponentRef::new("app"));
        assert_eq!(test.fully_qualified_name(), "com.example.FooTest#bar");
        assert_eq!(format!("{}", test), "com.example.FooTest#bar");
    }

    #[test]
    fn test_distinct_methods_are_distinct_tests() {
        let component = ComponentRef::new("app");
        let a = TestCase::new("com.example", "FooTest", "one", component.clone());
        let b = TestCase::new("com.example", "FooTest", "two", component);
        assert_ne!(a, b);
    }
}
