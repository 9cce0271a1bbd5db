//! Language tags for code blocks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A language a code block can be written in.
///
/// The tag is one half of an execution context's identity; the other half is
/// the document the block lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Ts,
    Python,
    R,
    Shell,
    Batch,
    Powershell,
    Lua,
    Go,
    Java,
    Kotlin,
    Groovy,
    Scala,
    Rust,
    C,
    Cpp,
    Cs,
    Haskell,
    Mathematica,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Language; 19] = [
        Language::Js,
        Language::Ts,
        Language::Python,
        Language::R,
        Language::Shell,
        Language::Batch,
        Language::Powershell,
        Language::Lua,
        Language::Go,
        Language::Java,
        Language::Kotlin,
        Language::Groovy,
        Language::Scala,
        Language::Rust,
        Language::C,
        Language::Cpp,
        Language::Cs,
        Language::Haskell,
        Language::Mathematica,
    ];

    /// Canonical tag, as used in settings files and fenced block headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Js => "js",
            Language::Ts => "ts",
            Language::Python => "python",
            Language::R => "r",
            Language::Shell => "shell",
            Language::Batch => "batch",
            Language::Powershell => "powershell",
            Language::Lua => "lua",
            Language::Go => "go",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::Groovy => "groovy",
            Language::Scala => "scala",
            Language::Rust => "rust",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Cs => "cs",
            Language::Haskell => "haskell",
            Language::Mathematica => "mathematica",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        let language = match tag.as_str() {
            "js" | "javascript" | "node" => Language::Js,
            "ts" | "typescript" => Language::Ts,
            "python" | "py" => Language::Python,
            "r" => Language::R,
            "shell" | "sh" | "bash" | "zsh" => Language::Shell,
            "batch" | "bat" | "cmd" => Language::Batch,
            "powershell" | "ps" | "ps1" => Language::Powershell,
            "lua" => Language::Lua,
            "go" | "golang" => Language::Go,
            "java" => Language::Java,
            "kotlin" | "kt" => Language::Kotlin,
            "groovy" => Language::Groovy,
            "scala" => Language::Scala,
            "rust" | "rs" => Language::Rust,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "cs" | "csharp" | "c#" => Language::Cs,
            "haskell" | "hs" => Language::Haskell,
            "mathematica" | "wolfram" => Language::Mathematica,
            _ => return Err(Error::UnknownLanguage(s.to_string())),
        };
        Ok(language)
    }
}
