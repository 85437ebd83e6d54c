use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier. Ordering of symbols is the tie-breaking order
/// everywhere in the engine.
pub type Symbol = String;

/// Deterministic dataset hash (BLAKE3 content hash of a panel).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn from_hash(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic run ID: BLAKE3 of the serialized configuration plus the
/// dataset hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Short prefix used in artifact directory names.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_deterministic() {
        let a = RunId::from_bytes(b"config-a");
        let b = RunId::from_bytes(b"config-a");
        let c = RunId::from_bytes(b"config-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.short().len(), 12);
    }
}
