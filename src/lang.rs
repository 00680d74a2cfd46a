//! Language detection from file extensions.

use std::path::Path;

/// Source language supported by the parsing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }
}

/// Detect the language of a path from its extension.
///
/// Returns None for unsupported files; callers silently skip those.
pub fn detect_language<P: AsRef<Path>>(path: P) -> Option<Language> {
    let ext = path.as_ref().extension()?.to_str()?;
    match ext {
        "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
        "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
        "py" | "pyi" => Some(Language::Python),
        "rs" => Some(Language::Rust),
        _ => None,
    }
}
