//! Domain resolution and content generation seams
//!
//! The orchestrator only needs two opaque calls: `path -> domain` and
//! `domain -> regenerated content`. The defaults here implement a simple,
//! documented mapping contract; richer analysers plug in through the traits.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// Maps changed source files to the domain owning them
pub trait DomainResolver: Send + Sync {
    /// Domain of a workspace-relative source path, if it belongs to one
    fn resolve(&self, path: &Path) -> Option<String>;

    /// Workspace-relative directory holding a domain's sources
    fn source_dir(&self, domain: &str) -> Option<PathBuf>;
}

/// One source file handed to a [`ContentGenerator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Workspace-relative path
    pub path: PathBuf,
    /// blake3 hash of the content
    pub hash: String,
    /// Size in bytes
    pub size: u64,
}

/// One file of regenerated context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    /// Path relative to the domain's context directory
    pub relative_path: PathBuf,
    /// Full file content
    pub content: String,
}

/// Produces the complete context of one domain from its current sources
pub trait ContentGenerator: Send + Sync {
    /// Regenerate everything for `domain`; the result replaces the previous context wholesale
    fn generate(&self, domain: &str, sources: &[SourceFile]) -> anyhow::Result<Vec<GeneratedArtifact>>;
}

/// Domain = first path segment below a source root
///
/// With no roots configured the workspace root is the only source root, so
/// `Analysis/x.cs` belongs to `Analysis`. Files directly in a root and hidden
/// directories belong to no domain.
#[derive(Debug, Clone)]
pub struct PathSegmentResolver {
    workspace_root: PathBuf,
    source_roots: Vec<PathBuf>,
}

impl PathSegmentResolver {
    /// Resolver over the given workspace-relative source roots
    pub fn new(workspace_root: impl Into<PathBuf>, source_roots: Vec<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            source_roots,
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let path = if path.is_absolute() {
            path.strip_prefix(&self.workspace_root).ok()?
        } else {
            path
        };
        let mut normalised = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => normalised.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(normalised)
    }
}

impl DomainResolver for PathSegmentResolver {
    fn resolve(&self, path: &Path) -> Option<String> {
        let relative = self.relative(path)?;

        let below_root = if self.source_roots.is_empty() {
            relative
        } else {
            self.source_roots
                .iter()
                .find_map(|root| relative.strip_prefix(root).ok().map(Path::to_path_buf))?
        };

        let mut components = below_root.components();
        let domain = match components.next()? {
            Component::Normal(part) => part.to_str()?.to_string(),
            _ => return None,
        };
        // a bare file directly in the root has no domain
        components.next()?;

        if domain.starts_with('.') {
            return None;
        }
        Some(domain)
    }

    fn source_dir(&self, domain: &str) -> Option<PathBuf> {
        if self.source_roots.is_empty() {
            return Some(PathBuf::from(domain));
        }
        self.source_roots
            .iter()
            .map(|root| root.join(domain))
            .find(|candidate| self.workspace_root.join(candidate).is_dir())
            .or_else(|| self.source_roots.first().map(|root| root.join(domain)))
    }
}

/// File name written by [`SummaryContentGenerator`]
pub const CONTEXT_FILE: &str = "CONTEXT.md";

/// Writes one deterministic `CONTEXT.md` per domain listing its sources
#[derive(Debug, Clone, Default)]
pub struct SummaryContentGenerator;

impl ContentGenerator for SummaryContentGenerator {
    fn generate(&self, domain: &str, sources: &[SourceFile]) -> anyhow::Result<Vec<GeneratedArtifact>> {
        let mut sorted: Vec<&SourceFile> = sources.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        let total: u64 = sorted.iter().map(|s| s.size).sum();

        let mut content = String::new();
        writeln!(content, "# {} context", domain)?;
        writeln!(content)?;
        writeln!(
            content,
            "Regenerated from {} source files ({} bytes).",
            sorted.len(),
            total
        )?;
        writeln!(content)?;
        writeln!(content, "| File | Bytes | blake3 |")?;
        writeln!(content, "|---|---|---|")?;
        for source in sorted {
            let short = source.hash.get(..16).unwrap_or(&source.hash);
            writeln!(
                content,
                "| {} | {} | {} |",
                source.path.display(),
                source.size,
                short
            )?;
        }

        Ok(vec![GeneratedArtifact {
            relative_path: PathBuf::from(CONTEXT_FILE),
            content,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Analysis/x.cs", Some("Analysis"))]
    #[case("./Analysis/deep/y.cs", Some("Analysis"))]
    #[case("/work/Billing/z.cs", Some("Billing"))]
    #[case("README.md", None)]
    #[case(".git/config", None)]
    #[case("../outside/x.cs", None)]
    #[case("/elsewhere/Analysis/x.cs", None)]
    fn test_resolve_without_roots(#[case] path: &str, #[case] expected: Option<&str>) {
        let resolver = PathSegmentResolver::new("/work", Vec::new());
        assert_eq!(
            resolver.resolve(Path::new(path)),
            expected.map(str::to_string)
        );
    }

    #[rstest]
    #[case("src/Analysis/x.cs", Some("Analysis"))]
    #[case("docs/Analysis/x.md", None)]
    #[case("src/lib.rs", None)]
    fn test_resolve_with_roots(#[case] path: &str, #[case] expected: Option<&str>) {
        let resolver = PathSegmentResolver::new("/work", vec![PathBuf::from("src")]);
        assert_eq!(
            resolver.resolve(Path::new(path)),
            expected.map(str::to_string)
        );
    }

    #[test]
    fn test_summary_is_deterministic() {
        let sources = vec![
            SourceFile {
                path: PathBuf::from("Analysis/b.cs"),
                hash: "b".repeat(64),
                size: 2,
            },
            SourceFile {
                path: PathBuf::from("Analysis/a.cs"),
                hash: "a".repeat(64),
                size: 1,
            },
        ];
        let mut reversed = sources.clone();
        reversed.reverse();

        let first = SummaryContentGenerator.generate("Analysis", &sources).unwrap();
        let second = SummaryContentGenerator.generate("Analysis", &reversed).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].relative_path, PathBuf::from(CONTEXT_FILE));
        assert!(first[0].content.contains("2 source files (3 bytes)"));
        let a = first[0].content.find("a.cs").unwrap();
        let b = first[0].content.find("b.cs").unwrap();
        assert!(a < b);
    }
}
