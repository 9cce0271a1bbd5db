//! Locating, loading and writing the settings file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use blockrun_core::ExecutorSettings;

/// `<config dir>/blockrun/settings.json`, if the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blockrun").join("settings.json"))
}

/// Load settings from `explicit`, else from the user settings file, else defaults.
///
/// An explicit path that cannot be loaded is an error; a missing user
/// settings file is not.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<ExecutorSettings> {
    if let Some(path) = explicit {
        return ExecutorSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()));
    }

    match default_settings_path() {
        Some(path) if path.exists() => {
            tracing::debug!("Loading settings from {}", path.display());
            ExecutorSettings::load(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        _ => Ok(ExecutorSettings::default()),
    }
}

/// Write the default settings to `output`, or to the user settings file.
pub fn write_defaults(output: Option<&Path>) -> anyhow::Result<()> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => default_settings_path()
            .context("No config directory on this platform; pass --output")?,
    };

    ExecutorSettings::default()
        .save(&path)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}
