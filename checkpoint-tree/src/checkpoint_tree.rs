use sha3::{Digest, Keccak256};
use snafu::Snafu;

use crate::HeaderLeaf;

/// Errors that can occur when computing a checkpoint root.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CheckpointTreeError {
    /// No headers were supplied.
    #[snafu(display("cannot build a checkpoint root over an empty header range"))]
    EmptyRange,
    /// The headers are not a contiguous ascending range.
    #[snafu(display("header {found} found where header {expected} was expected"))]
    NonContiguous {
        /// The block number the range required at this position.
        expected: u64,
        /// The block number actually supplied.
        found: u64,
    },
}

/// Returns the root over a contiguous, ascending run of headers.
pub fn checkpoint_root(headers: &[HeaderLeaf]) -> Result<[u8; 32], CheckpointTreeError> {
    let first = headers.first().ok_or(CheckpointTreeError::EmptyRange)?;

    for (offset, header) in headers.iter().enumerate() {
        let expected = first.number + offset as u64;
        if header.number != expected {
            return Err(CheckpointTreeError::NonContiguous {
                expected,
                found: header.number,
            });
        }
    }

    root_from_leaves(headers.iter().map(HeaderLeaf::hash).collect())
}

/// Returns the root over pre-hashed leaves.
///
/// Leaves are used as-is and padded with zero words to the next power of two.
pub fn root_from_leaves(mut leaves: Vec<[u8; 32]>) -> Result<[u8; 32], CheckpointTreeError> {
    if leaves.is_empty() {
        return Err(CheckpointTreeError::EmptyRange);
    }

    leaves.resize(leaves.len().next_power_of_two(), [0u8; 32]);

    while leaves.len() > 1 {
        leaves = leaves
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    Ok(leaves[0])
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
