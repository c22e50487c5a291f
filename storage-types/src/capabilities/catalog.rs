use super::FsCapabilities;
use serde::Deserialize;

// Load TOML data at compile time from the workspace resources directory
const FS_CAPABILITIES_TOML: &str = include_str!("../../../resources/fs_capabilities.toml");

#[derive(Deserialize)]
struct FsCapabilityCatalog {
    filesystems: Vec<FsCapabilities>,
}

fn parse(raw: &str) -> Result<Vec<FsCapabilities>, toml::de::Error> {
    toml::from_str::<FsCapabilityCatalog>(raw).map(|catalog| catalog.filesystems)
}

/// Every filesystem is reported unknown if the embedded catalog is broken.
pub static FS_CAPABILITIES: std::sync::LazyLock<Vec<FsCapabilities>> =
    std::sync::LazyLock::new(|| match parse(FS_CAPABILITIES_TOML) {
        Ok(filesystems) => filesystems,
        Err(e) => {
            tracing::error!("Filesystem capability catalog is invalid: {}", e);
            Vec::new()
        }
    });
