// merkle.rs — Binary Merkle tree over ordered record hashes.
//
// Leaves are `H(0x00 ∥ record_hash)` and interior nodes `H(0x01 ∥ left ∥ right)`
// so a leaf can never be passed off as an interior node. When a level has an
// odd number of nodes the last node is paired with itself. The empty tree's
// root is the genesis sentinel.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hasher::GENESIS_HASH;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn leaf_hash(record_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(record_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn node_hash(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse one level of the tree, duplicating the trailing node on odd counts.
fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => node_hash(left, right),
            [only] => node_hash(only, only),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Compute the Merkle root of an ordered list of record hashes.
pub fn merkle_root<S: AsRef<str>>(record_hashes: &[S]) -> String {
    if record_hashes.is_empty() {
        return GENESIS_HASH.to_string();
    }
    let mut level: Vec<String> = record_hashes
        .iter()
        .map(|h| leaf_hash(h.as_ref()))
        .collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.remove(0)
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

/// Audit path proving that one record hash is part of a Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// 0-based leaf position (sequence - 1).
    pub leaf_index: usize,
    pub leaf_count: usize,
    pub steps: Vec<ProofStep>,
}

/// Build the audit path for the leaf at `index`. Returns `None` when out of range.
pub fn inclusion_proof<S: AsRef<str>>(record_hashes: &[S], index: usize) -> Option<InclusionProof> {
    if index >= record_hashes.len() {
        return None;
    }
    let mut level: Vec<String> = record_hashes
        .iter()
        .map(|h| leaf_hash(h.as_ref()))
        .collect();
    let mut position = index;
    let mut steps = Vec::new();

    while level.len() > 1 {
        let step = if position % 2 == 0 {
            // Right sibling, or ourselves when we are the odd trailing node.
            let sibling = level.get(position + 1).unwrap_or(&level[position]);
            ProofStep {
                sibling: sibling.clone(),
                side: Side::Right,
            }
        } else {
            ProofStep {
                sibling: level[position - 1].clone(),
                side: Side::Left,
            }
        };
        steps.push(step);
        level = next_level(&level);
        position /= 2;
    }

    Some(InclusionProof {
        leaf_index: index,
        leaf_count: record_hashes.len(),
        steps,
    })
}

/// Check that `record_hash` folds up to `root` along `proof`.
pub fn verify_inclusion(root: &str, record_hash: &str, proof: &InclusionProof) -> bool {
    let mut running = leaf_hash(record_hash);
    for step in &proof.steps {
        running = match step.side {
            Side::Left => node_hash(&step.sibling, &running),
            Side::Right => node_hash(&running, &step.sibling),
        };
    }
    running == root
}
