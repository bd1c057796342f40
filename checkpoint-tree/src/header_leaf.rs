use sha3::{Digest, Keccak256};

/// The header fields a checkpoint commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLeaf {
    /// Block number.
    pub number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
    /// Root of the block's transaction trie.
    pub transactions_root: [u8; 32],
    /// Root of the block's receipt trie.
    pub receipts_root: [u8; 32],
}

impl HeaderLeaf {
    /// Returns the 32-byte leaf hash for this header.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        for word in [
            integer_word(self.number),
            integer_word(self.timestamp),
            Some(self.transactions_root),
            Some(self.receipts_root),
        ]
        .into_iter()
        .flatten()
        {
            hasher.update(word);
        }
        hasher.finalize().into()
    }
}

/// Left-pads a big-endian integer to a word.
///
/// Zero has an empty minimal big-endian encoding and contributes no word at all, which keeps
/// block zero's leaf compatible with the root-chain verifier.
fn integer_word(value: u64) -> Option<[u8; 32]> {
    if value == 0 {
        return None;
    }
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    Some(word)
}
