//! Regex-based symbol extraction per language.

use crate::language::Language;
use once_cell::sync::Lazy;
use regex::Regex;
use rice_core::types::MAX_SYMBOLS_PER_CHUNK;
use std::collections::HashSet;

struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    fn new(sources: &[&str]) -> Self {
        Self {
            patterns: sources
                .iter()
                .map(|source| Regex::new(source).expect("invalid symbol pattern"))
                .collect(),
        }
    }
}

static RUST_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)",
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(\w+)",
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(\w+)",
        r"(?m)^\s*impl(?:<[^>]*>)?\s+(\w+)",
        r"(?m)^\s*macro_rules!\s+(\w+)",
    ])
});

static GO_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^func\s+(\w+)",
        r"(?m)^func\s+\([^)]*\)\s+(\w+)",
        r"(?m)^type\s+(\w+)",
    ])
});

static PYTHON_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:async\s+)?def\s+(\w+)",
        r"(?m)^\s*class\s+(\w+)",
    ])
});

static JS_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
        r"(?m)^\s*(?:export\s+)?class\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:function|\()",
    ])
});

static TS_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
        r"(?m)^\s*(?:export\s+)?(?:abstract\s+)?class\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?interface\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?type\s+(\w+)\s*=",
        r"(?m)^\s*(?:export\s+)?enum\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:function|\()",
    ])
});

static JAVA_LIKE_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:public|private|protected|internal)?\s*(?:static\s+)?(?:final\s+)?(?:abstract\s+)?(?:class|interface|enum|record)\s+(\w+)",
        r"(?m)^\s*(?:public|private|protected|internal)\s+(?:static\s+)?[\w<>\[\],\s]+\s+(\w+)\s*\(",
    ])
});

static C_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*(?:typedef\s+)?(?:struct|enum|union)\s+(\w+)",
        r"(?m)^[\w\*]+[\s\*]+(\w+)\s*\([^;]*\)\s*\{",
    ])
});

static RUBY_PATTERNS: Lazy<PatternSet> = Lazy::new(|| {
    PatternSet::new(&[
        r"(?m)^\s*def\s+(?:self\.)?(\w+)",
        r"(?m)^\s*(?:class|module)\s+(\w+)",
    ])
});

static EMPTY_PATTERNS: Lazy<PatternSet> = Lazy::new(|| PatternSet::new(&[]));

fn patterns_for(language: Language) -> &'static PatternSet {
    match language {
        Language::Rust => &RUST_PATTERNS,
        Language::Go => &GO_PATTERNS,
        Language::Python => &PYTHON_PATTERNS,
        Language::JavaScript => &JS_PATTERNS,
        Language::TypeScript => &TS_PATTERNS,
        Language::Java | Language::CSharp | Language::Kotlin | Language::Scala
        | Language::Swift | Language::Php => &JAVA_LIKE_PATTERNS,
        Language::C | Language::Cpp => &C_PATTERNS,
        Language::Ruby => &RUBY_PATTERNS,
        _ => &EMPTY_PATTERNS,
    }
}

/// Extract function, class and type names present in a chunk, deduplicated
/// in first-seen order, capped at [`MAX_SYMBOLS_PER_CHUNK`].
pub fn extract_symbols(content: &str, language: Language) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for pattern in &patterns_for(language).patterns {
        for captures in pattern.captures_iter(content) {
            if let Some(name) = captures.get(1) {
                let name = name.as_str();
                if seen.insert(name.to_string()) {
                    symbols.push(name.to_string());
                    if symbols.len() >= MAX_SYMBOLS_PER_CHUNK {
                        return symbols;
                    }
                }
            }
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_symbols() {
        let content = "func Hello() string { return \"hi\" }\n\ntype Server struct {}\n\nfunc (s *Server) Run() error { return nil }\n";
        let symbols = extract_symbols(content, Language::Go);
        assert!(symbols.contains(&"Hello".to_string()));
        assert!(symbols.contains(&"Server".to_string()));
        assert!(symbols.contains(&"Run".to_string()));
    }

    #[test]
    fn test_rust_symbols() {
        let content = "pub struct Engine;\n\nimpl Engine {\n    pub async fn start(&self) {}\n}\n\npub(crate) fn helper() {}\n";
        let symbols = extract_symbols(content, Language::Rust);
        assert!(symbols.contains(&"Engine".to_string()));
        assert!(symbols.contains(&"start".to_string()));
        assert!(symbols.contains(&"helper".to_string()));
    }

    #[test]
    fn test_python_symbols() {
        let content = "class Indexer:\n    async def run(self):\n        pass\n\ndef main():\n    pass\n";
        let symbols = extract_symbols(content, Language::Python);
        assert_eq!(symbols, vec!["run", "main", "Indexer"]);
    }

    #[test]
    fn test_typescript_symbols() {
        let content = "export interface Options {}\nexport class Client {}\nexport const fetchAll = async () => {};\nexport function run() {}\n";
        let symbols = extract_symbols(content, Language::TypeScript);
        assert!(symbols.contains(&"Options".to_string()));
        assert!(symbols.contains(&"Client".to_string()));
        assert!(symbols.contains(&"fetchAll".to_string()));
        assert!(symbols.contains(&"run".to_string()));
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        assert!(extract_symbols("anything at all", Language::Unknown).is_empty());
    }

    #[test]
    fn test_dedup_and_cap() {
        let mut content = String::new();
        for i in 0..150 {
            content.push_str(&format!("func F{}() {{}}\nfunc F{}() {{}}\n", i, i));
        }
        let symbols = extract_symbols(&content, Language::Go);
        assert_eq!(symbols.len(), MAX_SYMBOLS_PER_CHUNK);
        // dedup: each name once
        let unique: HashSet<_> = symbols.iter().collect();
        assert_eq!(unique.len(), symbols.len());
    }
}
