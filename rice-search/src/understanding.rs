//! Query understanding: intent, keywords, code-term expansion.
//!
//! The heuristic path is deterministic and side-effect-free; it never
//! fails, returning an empty keyword set with baseline confidence for
//! degenerate input. A dedicated understanding model can augment it, but
//! none ships with the core, so `used_model` stays false here.

use once_cell::sync::Lazy;
use rice_core::protocol::{ParsedQuery, QueryIntent, TargetType};
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

/// Cap on how many expansion terms are appended to the search query.
const MAX_EXPANSIONS: usize = 8;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "may", "might", "can", "this",
        "that", "these", "those", "what", "which", "who", "when", "where", "why", "how", "me",
        "my", "it", "its", "all", "any", "some", "not", "no", "using", "used", "use",
    ]
    .into_iter()
    .collect()
});

/// Curated code-term families: a canonical term mapped to its synonyms
/// and common abbreviations. Matching any member pulls in the rest.
static CODE_TERM_FAMILIES: Lazy<Vec<Vec<&'static str>>> = Lazy::new(|| {
    vec![
        vec!["auth", "authentication", "authenticate", "login", "signin", "credential"],
        vec!["authorization", "authorize", "permission", "acl", "rbac"],
        vec!["db", "database", "storage", "store", "persistence"],
        vec!["config", "configuration", "settings", "options", "preferences"],
        vec!["error", "exception", "failure", "fault", "panic"],
        vec!["log", "logging", "logger", "trace", "tracing"],
        vec!["test", "testing", "spec", "assertion", "fixture"],
        vec!["cache", "caching", "memoize", "lru"],
        vec!["net", "network", "socket", "connection", "transport"],
        vec!["http", "request", "response", "endpoint", "route", "handler"],
        vec!["file", "filesystem", "path", "directory", "io"],
        vec!["search", "query", "find", "lookup", "retrieval"],
        vec!["index", "indexing", "indexer", "ingest", "ingestion"],
        vec!["parse", "parser", "parsing", "tokenize", "lexer", "decode"],
        vec!["serialize", "serialization", "deserialize", "marshal", "encode", "json"],
        vec!["thread", "concurrency", "async", "parallel", "mutex", "lock"],
        vec!["queue", "channel", "buffer", "stream", "pipeline"],
        vec!["crypto", "encryption", "encrypt", "hash", "hashing", "signature"],
    ]
});

static FAMILY_LOOKUP: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    let mut lookup = HashMap::new();
    for (index, family) in CODE_TERM_FAMILIES.iter().enumerate() {
        for term in family {
            lookup.insert(*term, index);
        }
    }
    lookup
});

/// Heuristic query parser.
#[derive(Debug, Default)]
pub struct QueryUnderstanding;

impl QueryUnderstanding {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw query. Never fails; degenerate input yields no
    /// keywords and baseline confidence.
    pub fn parse(&self, query: &str) -> ParsedQuery {
        let original = query.to_string();
        let lowered = query.to_lowercase();
        let words: Vec<&str> = lowered.unicode_words().collect();

        if words.is_empty() {
            return ParsedQuery {
                original,
                intent: QueryIntent::Find,
                target_type: None,
                keywords: Vec::new(),
                code_terms: Vec::new(),
                expanded: Vec::new(),
                search_query: query.to_string(),
                confidence: 0.5,
                used_model: false,
            };
        }

        let intent = detect_intent(&words);
        let target_type = detect_target_type(&words);

        let keywords: Vec<String> = words
            .iter()
            .filter(|word| !STOP_WORDS.contains(**word) && word.len() > 1)
            .map(|word| word.to_string())
            .collect();

        // Code terms: keywords matching a curated family. The family set
        // is ordered so expansion output is stable across runs.
        let mut code_terms = Vec::new();
        let mut matched_families = std::collections::BTreeSet::new();
        for keyword in &keywords {
            if let Some(&family) = FAMILY_LOOKUP.get(keyword.as_str()) {
                if !code_terms.contains(keyword) {
                    code_terms.push(keyword.clone());
                }
                matched_families.insert(family);
            }
        }

        // Expansion: family synonyms plus identifier-case splits.
        let mut expanded = Vec::new();
        let mut seen: HashSet<String> = keywords.iter().cloned().collect();
        for family in &matched_families {
            for term in &CODE_TERM_FAMILIES[*family] {
                if seen.insert((*term).to_string()) {
                    expanded.push((*term).to_string());
                }
            }
        }
        for raw in query.split_whitespace() {
            for part in split_identifier(raw) {
                if part.len() > 1 && seen.insert(part.clone()) {
                    expanded.push(part);
                }
            }
        }

        let search_query = if expanded.is_empty() {
            original.clone()
        } else {
            let mut assembled = original.clone();
            for term in expanded.iter().take(MAX_EXPANSIONS) {
                assembled.push(' ');
                assembled.push_str(term);
            }
            assembled
        };

        let mut confidence: f32 = 0.5;
        if !keywords.is_empty() {
            confidence += 0.2;
        }
        if !code_terms.is_empty() {
            confidence += 0.15;
        }
        if target_type.is_some() {
            confidence += 0.1;
        }
        if intent != QueryIntent::Find {
            confidence += 0.05;
        }

        ParsedQuery {
            original,
            intent,
            target_type,
            keywords,
            code_terms,
            expanded,
            search_query,
            confidence: confidence.min(1.0),
            used_model: false,
        }
    }
}

fn detect_intent(words: &[&str]) -> QueryIntent {
    let first = words[0];
    match first {
        "find" | "search" | "locate" | "show" | "get" | "where" => QueryIntent::Find,
        "explain" | "describe" | "what" | "how" | "why" | "understand" => QueryIntent::Explain,
        "list" | "enumerate" | "count" => QueryIntent::List,
        "fix" | "debug" | "resolve" | "repair" | "solve" => QueryIntent::Fix,
        "compare" | "diff" | "difference" | "contrast" => QueryIntent::Compare,
        _ => {
            if words.contains(&"vs") || words.contains(&"versus") {
                QueryIntent::Compare
            } else {
                QueryIntent::Find
            }
        }
    }
}

fn detect_target_type(words: &[&str]) -> Option<TargetType> {
    for word in words {
        match *word {
            "function" | "func" | "fn" | "method" | "procedure" => {
                return Some(TargetType::Function)
            }
            "class" | "struct" | "type" | "interface" | "trait" | "enum" => {
                return Some(TargetType::Class)
            }
            "variable" | "const" | "constant" | "field" | "property" => {
                return Some(TargetType::Variable)
            }
            "file" | "module" | "package" | "crate" => return Some(TargetType::File),
            "error" | "exception" | "bug" | "crash" | "panic" => return Some(TargetType::Error),
            _ => {}
        }
    }
    None
}

/// Split camelCase, snake_case and kebab-case identifiers into lowercase
/// parts.
fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in raw.split(|c: char| c == '_' || c == '-' || !c.is_alphanumeric()) {
        if piece.is_empty() {
            continue;
        }
        let mut current = String::new();
        for ch in piece.chars() {
            if ch.is_uppercase() && !current.is_empty() {
                parts.push(current.to_lowercase());
                current = String::new();
            }
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    // only report splits, not the raw token itself
    if parts.len() <= 1 {
        Vec::new()
    } else {
        parts
    }
}
