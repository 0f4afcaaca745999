//! JSON manifest test parser.
//!
//! Reads a flat JSON file describing the tests of one component. This is the
//! test source used by the CLI and the integration fixtures; platform
//! vendors replace it with a parser that interrogates a real test binary.
//!
//! # Manifest Format
//!
//! ```json
//! {
//!   "component": "app-debug",
//!   "tests": [
//!     { "package": "com.example", "class": "LoginTest", "method": "happyPath" },
//!     { "package": "com.example", "class": "LoginTest", "method": "wrongPassword",
//!       "metadata": ["flaky"] }
//!   ]
//! }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ComponentRef, DiscoveryError, DiscoveryResult, TestCase, TestParser};

#[derive(Debug, Deserialize)]
struct Manifest {
    component: String,
    tests: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    package: String,
    class: String,
    method: String,
    #[serde(default)]
    metadata: Vec<String>,
}

/// Parser that reads tests from a JSON manifest file.
#[derive(Debug, Default)]
pub struct ManifestTestParser;

impl ManifestTestParser {
    /// Creates a new manifest parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses a manifest from its JSON content.
    pub fn parse_str(&self, content: &str) -> DiscoveryResult<Vec<TestCase>> {
        let manifest: Manifest =
            serde_json::from_str(content).map_err(|e| DiscoveryError::ParseError(e.to_string()))?;

        let component = ComponentRef::new(manifest.component);
        Ok(manifest
            .tests
            .into_iter()
            .map(|entry| TestCase {
                package: entry.package,
                class: entry.class,
                method: entry.method,
                metadata: entry.metadata,
                component: component.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TestParser for ManifestTestParser {
    async fn extract(&self, source: &Path) -> DiscoveryResult<Vec<TestCase>> {
        let content = tokio::fs::read_to_string(source).await.map_err(|e| {
            DiscoveryError::SourceUnreadable(format!("{}: {}", source.display(), e))
        })?;
        self.parse_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let parser = ManifestTestParser::new();
        let tests = parser
            .parse_str(
                r#"{
                    "component": "app-debug",
                    "tests": [
                        { "package": "com.example", "class": "LoginTest", "method": "happyPath" },
                        { "package": "com.example", "class": "LoginTest", "method": "wrongPassword",
                          "metadata": ["flaky"] }
                    ]
                }"#,
            )
            .unwrap();

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].fully_qualified_name(), "com.example.LoginTest#happyPath");
        assert_eq!(tests[0].component.0, "app-debug");
        assert!(tests[1].has_metadata("flaky"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let parser = ManifestTestParser::new();
        assert!(matches!(
            parser.parse_str("not json"),
            Err(DiscoveryError::ParseError(_))
        ));
    }

    #[test]
    fn test_extract_reads_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tests.json");
        std::fs::write(
            &path,
            r#"{ "component": "app", "tests": [
                { "package": "com.example", "class": "FileTest", "method": "roundTrip" }
            ] }"#,
        )
        .unwrap();

        let tests = tokio_test::block_on(ManifestTestParser::new().extract(&path)).unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].class, "FileTest");
    }

    #[test]
    fn test_extract_missing_file_is_source_error() {
        let result = tokio_test::block_on(
            ManifestTestParser::new().extract(std::path::Path::new("no-such-manifest.json")),
        );
        assert!(matches!(result, Err(DiscoveryError::SourceUnreadable(_))));
    }
}
