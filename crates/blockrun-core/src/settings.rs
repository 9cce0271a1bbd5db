//! Executor settings.
//!
//! The core treats these as opaque configuration passed through to spawn
//! calls; values are not validated beyond presence. Settings are persisted as
//! JSON so hosts can share one file across runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::language::Language;

/// Text encoding used when writing a block's temp file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1. Characters outside U+0000..=U+00FF are written as `?`.
    Latin1,
}

impl FileEncoding {
    /// Encode source text for writing to disk.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            FileEncoding::Utf8 => text.as_bytes().to_vec(),
            FileEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Per-language configuration record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    /// Executable path (interpreter, compiler or runner).
    pub path: String,
    /// Default argument string, split on spaces at spawn time.
    pub args: String,
    /// File extension for temp files, without the dot.
    pub extension: String,
    /// Run blocks in a persistent session instead of one process per block.
    pub interactive: bool,
    /// Wrap C-family blocks' `main()` so the interpreter can run them as files.
    pub use_main: bool,
    /// Encoding of the temp file.
    pub encoding: FileEncoding,
    /// Route plots into the document instead of an interactive window.
    pub embed_plots: bool,
    /// Code prepended to every block of this language.
    pub inject: String,
}

impl LanguageSettings {
    fn new(path: &str, args: &str, extension: &str) -> Self {
        Self {
            path: path.to_string(),
            args: args.to_string(),
            extension: extension.to_string(),
            ..Self::default()
        }
    }

    fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Built-in defaults for a language.
    pub fn defaults_for(language: Language) -> Self {
        match language {
            Language::Js => Self::new("node", "", "js").interactive(),
            Language::Ts => Self::new("ts-node", "", "ts"),
            Language::Python => Self {
                embed_plots: true,
                ..Self::new("python", "", "py").interactive()
            },
            Language::R => Self {
                embed_plots: true,
                ..Self::new("Rscript", "", "R")
            },
            Language::Shell => Self::new("bash", "", "sh"),
            Language::Batch => Self::new("cmd", "", "bat"),
            Language::Powershell => Self {
                encoding: FileEncoding::Latin1,
                ..Self::new("powershell", "-file", "ps1")
            },
            Language::Lua => Self::new("lua", "", "lua"),
            Language::Go => Self::new("go", "run", "go"),
            Language::Java => Self::new("java", "-ea", "java"),
            Language::Kotlin => Self::new("kotlinc", "-script", "kts"),
            Language::Groovy => Self::new("groovy", "", "groovy"),
            Language::Scala => Self::new("scala", "", "scala"),
            Language::Rust => Self::new("cargo", "eval", "rs"),
            Language::C => Self {
                use_main: true,
                ..Self::new("gcc", "", "c")
            },
            Language::Cpp => Self::new("cling", "-std=c++17", "cpp"),
            Language::Cs => Self::new("dotnet-script", "", "csx"),
            Language::Haskell => Self::new("runghc", "", "hs"),
            Language::Mathematica => Self::new("wolframscript", "-file", "wls"),
        }
    }
}

/// Settings shared by every execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Wall-clock budget for a block, in milliseconds. Enforced by hosts, not the core.
    pub timeout_ms: u64,
    /// Forward user input to running blocks.
    pub allow_input: bool,
    /// Run every process through the WSL compatibility layer.
    pub wsl_mode: bool,
    /// Run only shell blocks through WSL.
    pub shell_wsl_mode: bool,
    /// Per-language configuration.
    pub languages: BTreeMap<Language, LanguageSettings>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            allow_input: true,
            wsl_mode: false,
            shell_wsl_mode: false,
            languages: Language::ALL
                .into_iter()
                .map(|language| (language, LanguageSettings::defaults_for(language)))
                .collect(),
        }
    }
}

impl ExecutorSettings {
    /// Load settings from a JSON file.
    ///
    /// Languages missing from the file keep their built-in defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Settings(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(content)?;
        for language in Language::ALL {
            settings
                .languages
                .entry(language)
                .or_insert_with(|| LanguageSettings::defaults_for(language));
        }
        Ok(settings)
    }

    /// Write settings to a JSON file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Configuration for one language.
    pub fn language(&self, language: Language) -> LanguageSettings {
        self.languages
            .get(&language)
            .cloned()
            .unwrap_or_else(|| LanguageSettings::defaults_for(language))
    }

    /// Whether blocks of this language run in a persistent session.
    pub fn is_interactive(&self, language: Language) -> bool {
        self.languages
            .get(&language)
            .is_some_and(|settings| settings.interactive)
    }

    /// Whether spawns for this language go through the WSL layer.
    pub fn wsl_enabled(&self, language: Language) -> bool {
        self.wsl_mode || (language == Language::Shell && self.shell_wsl_mode)
    }
}
