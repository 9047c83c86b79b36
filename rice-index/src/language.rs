//! Language detection from file extensions.

use serde::{Deserialize, Serialize};

/// Detected source language of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    Go,
    Python,
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    C,
    Cpp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Scala,
    Shell,
    Sql,
    Html,
    Css,
    Markdown,
    Yaml,
    Json,
    Toml,
    Unknown,
}

/// Structural family that selects the chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFamily {
    /// Split on top-level `{ }` balanced regions
    Brace,
    /// Split on dedent-to-baseline
    Indent,
    /// Split on `#` headings
    Heading,
    /// Fixed line windows
    Line,
}

impl Language {
    /// Detect from the path's extension; unrecognized types are `Unknown`.
    pub fn from_path(path: &str) -> Self {
        let extension = path.rsplit('.').next().unwrap_or("").to_lowercase();
        match extension.as_str() {
            "rs" => Self::Rust,
            "go" => Self::Go,
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" => Self::TypeScript,
            "java" => Self::Java,
            "cs" => Self::CSharp,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Self::Cpp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kt" | "kts" => Self::Kotlin,
            "scala" => Self::Scala,
            "sh" | "bash" | "zsh" => Self::Shell,
            "sql" => Self::Sql,
            "html" | "htm" => Self::Html,
            "css" | "scss" | "less" => Self::Css,
            "md" | "markdown" | "mdx" => Self::Markdown,
            "yaml" | "yml" => Self::Yaml,
            "json" => Self::Json,
            "toml" => Self::Toml,
            _ => Self::Unknown,
        }
    }

    /// Parse a client-supplied language override.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "rust" => Self::Rust,
            "go" | "golang" => Self::Go,
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "java" => Self::Java,
            "csharp" | "c#" => Self::CSharp,
            "c" => Self::C,
            "cpp" | "c++" => Self::Cpp,
            "ruby" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kotlin" => Self::Kotlin,
            "scala" => Self::Scala,
            "shell" | "bash" => Self::Shell,
            "sql" => Self::Sql,
            "html" => Self::Html,
            "css" => Self::Css,
            "markdown" => Self::Markdown,
            "yaml" => Self::Yaml,
            "json" => Self::Json,
            "toml" => Self::Toml,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::CSharp => "csharp",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Html => "html",
            Self::Css => "css",
            Self::Markdown => "markdown",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Unknown => "unknown",
        }
    }

    /// Which chunking strategy fits this language.
    pub fn family(&self) -> ChunkFamily {
        match self {
            Self::Rust
            | Self::Go
            | Self::JavaScript
            | Self::TypeScript
            | Self::Java
            | Self::CSharp
            | Self::C
            | Self::Cpp
            | Self::Swift
            | Self::Kotlin
            | Self::Scala
            | Self::Php
            | Self::Css
            | Self::Json => ChunkFamily::Brace,
            Self::Python | Self::Ruby | Self::Yaml => ChunkFamily::Indent,
            Self::Markdown => ChunkFamily::Heading,
            Self::Shell | Self::Sql | Self::Html | Self::Toml | Self::Unknown => ChunkFamily::Line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_from_extension() {
        assert_eq!(Language::from_path("src/main.rs"), Language::Rust);
        assert_eq!(Language::from_path("a.go"), Language::Go);
        assert_eq!(Language::from_path("app/models/user.py"), Language::Python);
        assert_eq!(Language::from_path("index.tsx"), Language::TypeScript);
        assert_eq!(Language::from_path("README.md"), Language::Markdown);
        assert_eq!(Language::from_path("data.bin"), Language::Unknown);
        assert_eq!(Language::from_path("Makefile"), Language::Unknown);
    }

    #[test]
    fn test_families() {
        assert_eq!(Language::Go.family(), ChunkFamily::Brace);
        assert_eq!(Language::Python.family(), ChunkFamily::Indent);
        assert_eq!(Language::Markdown.family(), ChunkFamily::Heading);
        assert_eq!(Language::Unknown.family(), ChunkFamily::Line);
    }

    #[test]
    fn test_name_roundtrip() {
        assert_eq!(Language::from_name("Go"), Language::Go);
        assert_eq!(Language::from_name(Language::Rust.as_str()), Language::Rust);
        assert_eq!(Language::from_name("cobol"), Language::Unknown);
    }
}
