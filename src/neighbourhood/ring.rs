//! Consistent-hash ring selection of neighbours.
//!
//! Every node name is hashed to a 64-bit token. Sorting all tokens, self
//! included, forms the ring; a node checks the `limit` tokens that follow
//! its own, wrapping around the end. Against a stable membership set each
//! node is then the successor of exactly `limit` others.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A peer instance to probe. Rebuilt from discovery on every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbour {
    pub pod_name: String,
    pub pod_ip: String,
    pub host_ip: String,
    pub node_name: String,
    pub node_hash: u64,
}

impl Neighbour {
    pub fn new(
        pod_name: impl Into<String>,
        pod_ip: impl Into<String>,
        host_ip: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        let node_name = node_name.into();
        Self {
            pod_name: pod_name.into(),
            pod_ip: pod_ip.into(),
            host_ip: host_ip.into(),
            node_hash: node_hash(&node_name),
            node_name,
        }
    }

    /// Check label for a probe against this neighbour.
    pub fn label(&self) -> String {
        format!("path_{}", self.node_name)
    }
}

/// First eight bytes (big endian) of the SHA-256 of `node_name`.
pub fn node_hash(node_name: &str) -> u64 {
    let digest = Sha256::digest(node_name.as_bytes());
    let mut token = [0u8; 8];
    token.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(token)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The own node name is not known, typically because the own pod record
    /// was missing from discovery this cycle.
    #[error("own node is unknown, cannot place it on the neighbour ring")]
    UnknownSelf,
}

/// Pick at most `limit` neighbours for `self_node` out of `candidates`.
///
/// With `limit == 0` or no more candidates than `limit`, every candidate is
/// returned unchanged.
pub fn select(
    self_node: &str,
    candidates: &[Neighbour],
    limit: usize,
) -> Result<Vec<Neighbour>, SelectError> {
    if limit == 0 || candidates.len() <= limit {
        return Ok(candidates.to_vec());
    }
    if self_node.is_empty() {
        return Err(SelectError::UnknownSelf);
    }

    // (token, slot): slot None is self, Some(i) is candidates[i]. Self
    // sorts before candidates sharing its token, so those come first.
    let self_entry = (node_hash(self_node), None);
    let mut ring: Vec<(u64, Option<usize>)> = candidates
        .iter()
        .enumerate()
        .map(|(i, n)| (n.node_hash, Some(i)))
        .collect();
    ring.push(self_entry);
    ring.sort_unstable();

    let position = ring.partition_point(|entry| *entry < self_entry);

    let selected = ring
        .iter()
        .cycle()
        .skip(position + 1)
        .take(ring.len() - 1)
        .filter_map(|(_, slot)| *slot)
        .take(limit)
        .map(|i| candidates[i].clone())
        .collect();
    Ok(selected)
}
