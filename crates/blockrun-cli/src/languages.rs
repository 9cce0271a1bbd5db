//! Languages command implementation for blockrun CLI.

use std::path::Path;

use blockrun_core::Language;
use blockrun_core::session::substitute_username;

use crate::colors;
use crate::config;

/// List every language with its configured executable and whether it resolves.
pub fn execute(settings_path: Option<&Path>) -> anyhow::Result<()> {
    let settings = config::load(settings_path)?;

    println!(
        "{}{:<12} {:<8} {:<20} {}{}",
        colors::BOLD,
        "LANGUAGE",
        "MODE",
        "EXECUTABLE",
        "STATUS",
        colors::RESET
    );
    let user = std::env::var("USERNAME").ok();
    for language in Language::ALL {
        let entry = settings.language(language);
        let mode = if entry.interactive { "session" } else { "one-shot" };
        let status = match which::which(substitute_username(&entry.path, user.as_deref())) {
            Ok(found) => format!("{}{}{}", colors::GREEN, found.display(), colors::RESET),
            Err(_) => format!("{}not found{}", colors::RED, colors::RESET),
        };
        println!("{:<12} {:<8} {:<20} {}", language.as_str(), mode, entry.path, status);
    }

    if let Some(path) = config::default_settings_path() {
        println!("\n{}Settings file: {}{}", colors::DIM, path.display(), colors::RESET);
    }
    Ok(())
}
