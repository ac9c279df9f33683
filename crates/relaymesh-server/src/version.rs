//! Build metadata emitted by `build.rs`.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit SHA
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

pub const GIT_COMMIT_TIMESTAMP: &str = env!("VERGEN_GIT_COMMIT_TIMESTAMP");

pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

/// "true" when the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Identify protocol version. Peers advertising a different major line are
/// never admitted as cluster members.
pub const PROTOCOL_VERSION: &str = concat!("/relaymesh/", env!("CARGO_PKG_VERSION_MAJOR"));

/// Returns `<version> (<git_sha>)`, with a ` dirty` marker when applicable.
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// Multi-line build description printed by `--build-info`.
pub fn build_info() -> String {
    format!(
        "relaymesh-server {}\n\
         commit: {} ({})\n\
         branch: {}\n\
         built:  {}\n\
         rustc:  {}\n\
         target: {}",
        VERSION, GIT_SHA, GIT_COMMIT_TIMESTAMP, GIT_BRANCH, BUILD_TIMESTAMP, RUSTC_VERSION, TARGET
    )
}

/// Build metadata served at `/version`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub git_branch: &'static str,
    pub git_dirty: bool,
    pub build_timestamp: &'static str,
    pub rustc: &'static str,
    pub target: &'static str,
    pub protocol: &'static str,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: VERSION,
        git_sha: GIT_SHA,
        git_branch: GIT_BRANCH,
        git_dirty: GIT_DIRTY == "true",
        build_timestamp: BUILD_TIMESTAMP,
        rustc: RUSTC_VERSION,
        target: TARGET,
        protocol: PROTOCOL_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_prefix() {
        assert!(PROTOCOL_VERSION.starts_with("/relaymesh/"));
    }

    #[test]
    fn test_full_version_contains_sha() {
        assert!(full_version().contains(GIT_SHA));
        assert!(build_info().starts_with("relaymesh-server "));
    }
}
