//! Deterministic identifiers derived from SHA-256.
//!
//! Every identifier in Rice is a truncated hex digest so that re-indexing
//! the same content is idempotent and ids are stable across processes.

use sha2::{Digest, Sha256};

/// Length of truncated hex ids (64 bits of the digest).
pub const ID_HEX_LEN: usize = 16;

fn truncated_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let mut id = hex::encode(digest);
    id.truncate(ID_HEX_LEN);
    id
}

/// Chunk id from its coordinates.
///
/// The id is a pure function of `(store, path, start_line, end_line)`, so
/// an upsert for the same region of the same file replaces the prior point
/// instead of duplicating it.
pub fn chunk_id(store: &str, path: &str, start_line: u32, end_line: u32) -> String {
    truncated_hex(format!("{}|{}|{}|{}", store, path, start_line, end_line).as_bytes())
}

/// Chunk id scoped to an owning connection.
///
/// Connection-tagged chunks carry the tag in the id material so two
/// tenants indexing the same path keep distinct points; untagged chunks
/// use the plain coordinate id.
pub fn scoped_chunk_id(
    store: &str,
    path: &str,
    start_line: u32,
    end_line: u32,
    connection: Option<&str>,
) -> String {
    match connection {
        None => chunk_id(store, path, start_line, end_line),
        Some(connection) => truncated_hex(
            format!(
                "{}|{}|{}|{}|{}",
                store, path, start_line, end_line, connection
            )
            .as_bytes(),
        ),
    }
}

/// Document id from its path.
pub fn document_id(path: &str) -> String {
    truncated_hex(path.as_bytes())
}

/// Stable connection id from client PC info.
pub fn connection_id(mac: &str, hostname: &str, user: &str) -> String {
    truncated_hex(format!("{}|{}|{}", mac, hostname, user).as_bytes())
}

/// Full SHA-256 content hash, hex encoded.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Cache fingerprint for an ML head: `SHA-256(head | model | text)`.
pub fn ml_fingerprint(head: &str, model: &str, text: &str) -> String {
    hex::encode(Sha256::digest(
        format!("{}|{}|{}", head, model, text).as_bytes(),
    ))
}

/// Parse a chunk id into the u64 point id used by the vector store.
///
/// The truncated digest is exactly 16 hex chars, so this cannot fail for
/// ids produced by [`chunk_id`].
pub fn chunk_point_id(id: &str) -> Option<u64> {
    u64::from_str_radix(id, 16).ok()
}
