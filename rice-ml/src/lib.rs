//! Embedded ML service: three model heads behind one runtime.
//!
//! The service owns a dense embedder, a SPLADE-style sparse encoder, and a
//! cross-encoder reranker, all running on ONNX Runtime with per-head device
//! selection (GPU requested, CPU fallback) and per-head fingerprint caches.
//! When a head has no model file configured it degrades to a deterministic
//! hash-based implementation, which keeps the full pipeline operational in
//! tests and model-less deployments.
//!
//! Handlers registered on the event bus answer `ml.embed.request`,
//! `ml.sparse.request` and `ml.rerank.request`, preserving correlation ids
//! and reporting handler latency.

pub mod cache;
pub mod embedder;
pub mod reranker;
pub mod service;
pub mod session;
pub mod sparse;

pub use service::{HeadHealth, MlService, MlServiceHealth};
pub use session::Device;

/// Tokenize text the way the fallback heads see it: lowercase alphanumeric
/// runs, plus camelCase segment splits.
pub(crate) fn fallback_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        tokens.push(raw.to_lowercase());
        // camelCase / PascalCase segments
        let mut segment = String::new();
        for ch in raw.chars() {
            if ch.is_uppercase() && !segment.is_empty() {
                tokens.push(segment.to_lowercase());
                segment.clear();
            }
            segment.push(ch);
        }
        if !segment.is_empty() && segment.len() < raw.len() {
            tokens.push(segment.to_lowercase());
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_tokens_split_camel_case() {
        let tokens = fallback_tokens("func HelloWorld() string");
        assert!(tokens.contains(&"helloworld".to_string()));
        assert!(tokens.contains(&"hello".to_string()));
        assert!(tokens.contains(&"world".to_string()));
        assert!(tokens.contains(&"string".to_string()));
    }

    #[test]
    fn test_fallback_tokens_plain_words() {
        let tokens = fallback_tokens("read the file");
        assert_eq!(tokens, vec!["read", "the", "file"]);
    }
}
