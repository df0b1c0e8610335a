//! Binary Merkle tree over hex-encoded record hashes.
//!
//! Leaves are the hex `record_hash` strings already produced by the ledger;
//! they are not re-hashed on the way in. Internal nodes are
//! `sha256(left_hex || right_hex)` — the concatenation of the *hex text* of
//! the two children, not their decoded 32-byte values. This is deliberate
//! and must never change: it is the wire-compatible choice existing proof
//! bundles assume, and a raw-byte variant would be a different, incompatible
//! protocol. An odd node at any level is paired with itself.

use caas_enc::sha256_hex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    #[error("empty tree cannot compute a root")]
    EmptyTree,
    #[error("index out of bounds: {index} >= {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Which side of the accumulating hash a proof-path sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Position {
    Left,
    Right,
}

/// A sibling hash and its position, one step of an inclusion proof's path
/// from leaf to root.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProofStep {
    pub sibling_hash: String,
    pub position: Position,
}

/// An inclusion proof: the leaf it proves membership for, the root it proves
/// membership in, and the sibling path between them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub root_hash: String,
    pub proof_path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Re-walks the path from `leaf_hash` to the root and checks it lands on
    /// `root_hash`. Never fails with an error — an invalid proof simply
    /// verifies to `false`, per this system's rule that verification is
    /// pure and infallible.
    pub fn verify(&self) -> bool {
        let mut acc = self.leaf_hash.clone();
        for step in &self.proof_path {
            acc = match step.position {
                Position::Left => internal_hash(&step.sibling_hash, &acc),
                Position::Right => internal_hash(&acc, &step.sibling_hash),
            };
        }
        acc == self.root_hash
    }
}

fn internal_hash(left_hex: &str, right_hex: &str) -> String {
    let mut preimage = String::with_capacity(left_hex.len() + right_hex.len());
    preimage.push_str(left_hex);
    preimage.push_str(right_hex);
    sha256_hex(preimage.as_bytes())
}

/// A Merkle tree built once over a fixed batch of leaf hashes. Immutable
/// after construction — a new batch gets a new tree, it is never appended
/// to.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    /// Leaves after odd-node duplication (so `levels[0].len()` is always even
    /// unless there is exactly one leaf).
    levels: Vec<Vec<String>>,
    /// Number of leaves actually supplied, before duplication padding.
    original_len: usize,
}

impl MerkleTree {
    /// Builds a tree over `leaves` (in order). `leaves` must be non-empty.
    pub fn new(leaves: Vec<String>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        let original_len = leaves.len();

        let mut level = leaves;
        if level.len() % 2 == 1 {
            let last = level.last().unwrap().clone();
            level.push(last);
        }
        let mut levels = vec![level.clone()];

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(internal_hash(left, right));
            }
            if next.len() % 2 == 1 && next.len() > 1 {
                let last = next.last().unwrap().clone();
                next.push(last);
            }
            levels.push(next.clone());
            level = next;
        }

        Ok(Self { levels, original_len })
    }

    pub fn root(&self) -> &str {
        // Non-empty by construction: `new` rejects empty input.
        self.levels.last().unwrap().first().unwrap()
    }

    /// Number of leaves actually supplied to `new` (pre-duplication).
    pub fn len(&self) -> usize {
        self.original_len
    }

    pub fn is_empty(&self) -> bool {
        self.original_len == 0
    }

    /// Builds the inclusion proof for the leaf originally at `index`.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        if index >= self.original_len {
            return Err(MerkleError::IndexOutOfBounds { index, len: self.original_len });
        }

        let leaf_hash = self.levels[0][index].clone();
        let mut path = Vec::new();
        let mut current_index = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let is_left = current_index % 2 == 0;
            let sibling_index = if is_left { current_index + 1 } else { current_index - 1 };
            let sibling_hash = level[sibling_index].clone();
            // Our accumulator sits on `current_index`'s side; the sibling
            // sits on the opposite side.
            let position = if is_left { Position::Right } else { Position::Left };
            path.push(ProofStep { sibling_hash, position });
            current_index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash,
            root_hash: self.root().to_string(),
            proof_path: path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| sha256_hex(format!("leaf-{i}").as_bytes())).collect()
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert_eq!(MerkleTree::new(vec![]), Err(MerkleError::EmptyTree));
    }

    #[test]
    fn single_leaf_proof_verifies() {
        // A lone leaf is duplicated against itself to seed the tree, so its
        // proof still has one step (self-pairing), not zero.
        let tree = MerkleTree::new(leaves(1)).unwrap();
        let proof = tree.proof(0).unwrap();
        assert!(proof.verify());
        assert_eq!(proof.proof_path.len(), 1);
    }

    #[test]
    fn four_leaf_proof_has_two_steps_and_verifies() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        for i in 0..4 {
            let proof = tree.proof(i).unwrap();
            assert_eq!(proof.proof_path.len(), 2);
            assert!(proof.verify(), "leaf {i} failed to verify");
        }
    }

    #[test]
    fn odd_leaf_count_still_verifies_every_original_leaf() {
        let tree = MerkleTree::new(leaves(5)).unwrap();
        assert_eq!(tree.len(), 5);
        for i in 0..5 {
            assert!(tree.proof(i).unwrap().verify());
        }
    }

    #[test]
    fn out_of_bounds_index_is_an_error() {
        let tree = MerkleTree::new(leaves(3)).unwrap();
        assert_eq!(tree.proof(10), Err(MerkleError::IndexOutOfBounds { index: 10, len: 3 }));
    }

    #[test]
    fn swapping_a_sibling_hash_breaks_verification() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        let mut proof = tree.proof(1).unwrap();
        proof.proof_path[0].sibling_hash = sha256_hex(b"not the real sibling");
        assert!(!proof.verify());
    }

    #[test]
    fn flipping_a_position_bit_breaks_verification() {
        let tree = MerkleTree::new(leaves(4)).unwrap();
        let mut proof = tree.proof(1).unwrap();
        proof.proof_path[0].position = match proof.proof_path[0].position {
            Position::Left => Position::Right,
            Position::Right => Position::Left,
        };
        assert!(!proof.verify());
    }

    #[test]
    fn internal_hashing_uses_hex_text_not_raw_bytes() {
        let a = sha256_hex(b"a");
        let b = sha256_hex(b"b");
        let tree = MerkleTree::new(vec![a.clone(), b.clone()]).unwrap();
        let mut preimage = a;
        preimage.push_str(&b);
        let expected = sha256_hex(preimage.as_bytes());
        assert_eq!(tree.root(), expected);
    }

    proptest! {
        #[test]
        fn every_leaf_in_an_arbitrary_batch_proves(n in 1usize..64) {
            let tree = MerkleTree::new(leaves(n)).unwrap();
            let root = tree.root().to_string();
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                prop_assert_eq!(&proof.root_hash, &root);
                prop_assert!(proof.verify());
            }
        }
    }
}
