//! Merkle roots over child-chain block headers.
//!
//! A checkpoint or milestone commits to a contiguous range of child-chain blocks through a
//! single 32-byte root. Every validator must derive the same root from the same headers, so
//! the leaf encoding and the tree shape are fixed:
//!
//! - each header becomes one leaf, `keccak256(number ‖ timestamp ‖ txRoot ‖ receiptsRoot)`,
//!   with every field left-padded to a 32-byte word;
//! - leaves are not re-hashed when the tree is built;
//! - the leaf list is padded with zero words up to the next power of two;
//! - inner nodes are `keccak256(left ‖ right)`.

mod header_leaf;
pub use header_leaf::HeaderLeaf;

mod checkpoint_tree;
pub use checkpoint_tree::{checkpoint_root, root_from_leaves, CheckpointTreeError};
