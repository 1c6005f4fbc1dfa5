// Temporary ID Generator - locally issued ids for entities the server has not acknowledged
// Ids live in a reserved namespace so they can never collide with server-issued ids

use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix reserved for client-side ids. Server ids carrying it are rejected.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Temporary id format: `temp-<sequence:hex>-<random:8 hex>`
/// The sequence makes ids unique within a session, the random suffix across sessions.
#[derive(Debug)]
pub struct TempIdGenerator {
    sequence: AtomicU64,
}

impl Default for TempIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TempIdGenerator {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }

    /// Generate the next temporary id
    pub fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix: u32 = rand::random();
        format!("{}{:x}-{:08x}", TEMP_ID_PREFIX, sequence, suffix)
    }

    /// Whether an id belongs to the reserved temporary namespace
    pub fn is_temporary(id: &str) -> bool {
        id.starts_with(TEMP_ID_PREFIX)
    }

    /// Extract the session sequence from a temporary id
    pub fn extract_sequence(id: &str) -> Option<u64> {
        let rest = id.strip_prefix(TEMP_ID_PREFIX)?;
        let (sequence, _) = rest.split_once('-')?;
        u64::from_str_radix(sequence, 16).ok()
    }

    /// Number of ids issued so far
    pub fn issued(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_id_generation() {
        let generator = TempIdGenerator::new();

        let id1 = generator.next_id();
        let id2 = generator.next_id();
        let id3 = generator.next_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);

        assert!(TempIdGenerator::is_temporary(&id1));
        assert_eq!(TempIdGenerator::extract_sequence(&id1), Some(0));
        assert_eq!(TempIdGenerator::extract_sequence(&id2), Some(1));
        assert_eq!(TempIdGenerator::extract_sequence(&id3), Some(2));
        assert_eq!(generator.issued(), 3);
    }

    #[test]
    fn test_server_ids_are_not_temporary() {
        assert!(!TempIdGenerator::is_temporary("post-42"));
        assert!(!TempIdGenerator::is_temporary("5f1c0a7e-temp"));
        assert_eq!(TempIdGenerator::extract_sequence("post-42"), None);
    }
}
