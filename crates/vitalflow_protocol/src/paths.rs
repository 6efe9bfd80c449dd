use std::path::{Path, PathBuf};
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the VitalFlow home directory.
///
/// Priority:
/// 1) VITALFLOW_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.vitalflow
pub fn vitalflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("VITALFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".vitalflow");
    }
    PathBuf::from(".").join(".vitalflow")
}

fn ensure_home_dir(home: &Path) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create VitalFlow home directory {}: {}. Set VITALFLOW_HOME or pass --config.",
                home.display(),
                err
            );
        });
    }
}

/// Default config file: ~/.vitalflow/config.toml
pub fn default_config_path() -> PathBuf {
    vitalflow_home().join("config.toml")
}

/// Default dedup store path: ~/.vitalflow/dedup.sqlite
pub fn default_dedup_store_path() -> PathBuf {
    let home = vitalflow_home();
    ensure_home_dir(&home);
    home.join("dedup.sqlite")
}

/// Default dedup store URL pointing at [`default_dedup_store_path`].
pub fn default_dedup_store_url() -> String {
    format!("sqlite:{}", default_dedup_store_path().display())
}

/// Default logs directory: ~/.vitalflow/logs
pub fn default_logs_dir() -> PathBuf {
    let home = vitalflow_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Default message spool: ~/.vitalflow/spool
pub fn default_spool_dir() -> PathBuf {
    vitalflow_home().join("spool")
}

/// Default payload store root: ~/.vitalflow/objects
pub fn default_payload_root() -> PathBuf {
    vitalflow_home().join("objects")
}

/// Default training artifact root: ~/.vitalflow/artifacts
pub fn default_artifact_root() -> PathBuf {
    vitalflow_home().join("artifacts")
}
