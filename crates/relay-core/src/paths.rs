use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "relay.yaml";
pub const OUT_DIR: &str = "relay.out";

pub const TEMPLATE_SUFFIX: &str = ".template.json";
pub const ASSETS_SUFFIX: &str = ".assets.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn out_dir(root: &Path) -> PathBuf {
    root.join(OUT_DIR)
}

pub fn template_path(out: &Path, stack_name: &str) -> PathBuf {
    out.join(format!("{stack_name}{TEMPLATE_SUFFIX}"))
}

pub fn assets_path(out: &Path, stack_name: &str) -> PathBuf {
    out.join(format!("{stack_name}{ASSETS_SUFFIX}"))
}

/// Resolve a configured directory against the project root. Absolute paths
/// are returned unchanged.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
