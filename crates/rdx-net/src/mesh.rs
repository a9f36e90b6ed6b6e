//! Group membership parsing and full-mesh dial planning.
//!
//! A reducer group is a flat, ordered list of `host:port` peers, each
//! assigned its position in the list as its mesh index. Every pair of
//! distinct members needs exactly one connection between them; which side
//! dials and which side listens is decided by an even/odd tie-break on the
//! pair's indices so the decision is symmetric without either side having
//! to negotiate it.

use std::net::SocketAddr;

use crate::error::MeshError;

/// One member of a reducer group, as listed in group configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducerNode {
    pub index: usize,
    pub id: u64,
    pub addr: SocketAddr,
}

/// The parsed membership of a reducer group: every peer, plus which index
/// in it is "us".
#[derive(Clone, Debug)]
pub struct GroupMembership {
    pub nodes: Vec<ReducerNode>,
    pub self_index: usize,
}

impl GroupMembership {
    pub fn self_node(&self) -> &ReducerNode {
        &self.nodes[self.self_index]
    }

    pub fn peers(&self) -> impl Iterator<Item = &ReducerNode> {
        let self_index = self.self_index;
        self.nodes.iter().filter(move |n| n.index != self_index)
    }

    pub fn by_id(&self, id: u64) -> Option<&ReducerNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Parse a group definition of `id@host:port` entries (one per reducer,
/// in mesh-index order) plus which id is ours.
pub fn parse_group(entries: &[String], self_id: u64) -> Result<GroupMembership, MeshError> {
    let mut nodes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let (id_str, addr_str) =
            entry.split_once('@').ok_or_else(|| MeshError::Resolve(entry.clone()))?;
        let id: u64 = id_str.parse().map_err(|_| MeshError::Resolve(entry.clone()))?;
        let addr: SocketAddr =
            addr_str.parse().map_err(|_| MeshError::Resolve(entry.clone()))?;
        nodes.push(ReducerNode { index, id, addr });
    }
    let self_index = nodes
        .iter()
        .position(|n| n.id == self_id)
        .ok_or_else(|| MeshError::Resolve(format!("self id {self_id} not present in group")))?;
    Ok(GroupMembership { nodes, self_index })
}

/// Whether the mesh index `self_idx` is responsible for dialing
/// `peer_idx`. Symmetric by construction: for any distinct pair exactly
/// one side's call returns `true`.
pub fn should_dial(self_idx: usize, peer_idx: usize) -> bool {
    if self_idx == peer_idx {
        return false;
    }
    let (lo, hi) = if self_idx < peer_idx { (self_idx, peer_idx) } else { (peer_idx, self_idx) };
    let same_parity = lo % 2 == hi % 2;
    let lower_dials = same_parity;
    if lower_dials { self_idx == lo } else { self_idx == hi }
}

/// One outbound connection this node must initiate to complete the mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialIntent {
    pub peer_id: u64,
    pub addr: SocketAddr,
}

/// Compute the set of peers this node must dial to complete the full mesh,
/// given it already knows its own position. The complementary set (peers
/// expected to dial in) is simply every other peer not in this list.
pub fn build_mesh(group: &GroupMembership) -> Vec<DialIntent> {
    group
        .peers()
        .filter(|peer| should_dial(group.self_index, peer.index))
        .map(|peer| DialIntent { peer_id: peer.id, addr: peer.addr })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group() -> Vec<String> {
        vec![
            "1@127.0.0.1:9001".into(),
            "2@127.0.0.1:9002".into(),
            "3@127.0.0.1:9003".into(),
            "4@127.0.0.1:9004".into(),
        ]
    }

    #[test]
    fn parse_group_finds_self_index() {
        let g = parse_group(&sample_group(), 3).unwrap();
        assert_eq!(g.self_index, 2);
        assert_eq!(g.nodes.len(), 4);
    }

    #[test]
    fn should_dial_is_symmetric_and_exclusive() {
        for i in 0..6usize {
            for j in 0..6usize {
                if i == j {
                    continue;
                }
                assert_ne!(should_dial(i, j), should_dial(j, i), "pair ({i}, {j})");
            }
        }
    }

    #[test]
    fn build_mesh_never_dials_self() {
        let g = parse_group(&sample_group(), 1).unwrap();
        let dials = build_mesh(&g);
        assert!(dials.iter().all(|d| d.peer_id != 1));
    }

    #[test]
    fn every_pair_is_dialed_from_exactly_one_side() {
        let entries = sample_group();
        let n = entries.len();
        let mut dial_count = vec![0u32; n * n];
        for self_id in 1..=4u64 {
            let g = parse_group(&entries, self_id).unwrap();
            for intent in build_mesh(&g) {
                let peer_idx = g.by_id(intent.peer_id).unwrap().index;
                dial_count[g.self_index * n + peer_idx] += 1;
            }
        }
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let total = dial_count[i * n + j] + dial_count[j * n + i];
                assert_eq!(total, 1, "pair ({i}, {j}) dialed {total} times");
            }
        }
    }
}
