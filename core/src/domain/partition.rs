// SPDX-License-Identifier: Apache-2.0

//! Partition-set algebra: expanding user-supplied partitions into
//! disjoint-by-construction chain groups, and the iptables chain naming
//! scheme used to persist/recover them.

use std::collections::HashSet;

use crate::domain::errors::BlockadeError;

/// Prefix every blockade-managed iptables chain carries, so
/// `get_source_chains` can recognize which FORWARD-chain targets are ours.
pub const CHAIN_PREFIX: &str = "blockade-";

/// iptables chain names are capped at 29 characters by the kernel; we keep
/// a safety margin and truncate `"<prefix><topology-id>"` to fit within 25
/// before appending the `-p<index>` suffix.
const CHAIN_NAME_MAX_LEN: usize = 25;

/// The `"<prefix><topology-id>"` portion of every chain name this topology
/// owns, truncated to [`CHAIN_NAME_MAX_LEN`]. Two topologies whose ids
/// share this truncated prefix would collide; topology ids are capped at
/// 25 characters themselves (see `domain::topology`) specifically to avoid
/// that.
pub fn chain_prefix(topology_id: &str) -> String {
    let full = format!("{}{}", CHAIN_PREFIX, topology_id);
    if full.len() > CHAIN_NAME_MAX_LEN {
        full[..CHAIN_NAME_MAX_LEN].to_string()
    } else {
        full
    }
}

/// Build the iptables chain name for partition group `index` within
/// `topology_id`'s own chain namespace.
pub fn partition_chain_name(topology_id: &str, index: usize) -> String {
    format!("{}-p{}", chain_prefix(topology_id), index)
}

/// Recover the partition group index encoded in a chain name produced by
/// [`partition_chain_name`] for `topology_id`, if `name` is one of that
/// topology's own chains.
pub fn parse_partition_index(topology_id: &str, name: &str) -> Option<usize> {
    let prefix = format!("{}-p", chain_prefix(topology_id));
    let rest = name.strip_prefix(&prefix)?;
    rest.parse::<usize>().ok()
}

/// A set of container names that should be mutually reachable, and mutually
/// cut off from every container not in the set.
pub type PartitionSet = HashSet<String>;

/// Validate and normalize a user-supplied list of partitions against the
/// known container names in the topology:
///
/// - every name referenced must exist in the topology
/// - a name may appear in more than one of the caller-supplied partitions;
///   overlap between input sets is legal here and resolved downstream by
///   [`chain_groups`] (§4.6), not rejected
/// - any container not mentioned in any partition is appended as its own
///   leftover group, so partitioning is always total over the topology's
///   containers.
pub fn expand_partitions(
    known_names: &HashSet<String>,
    partitions: &[Vec<String>],
) -> Result<Vec<PartitionSet>, BlockadeError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result: Vec<PartitionSet> = Vec::new();

    for group in partitions {
        let mut set: PartitionSet = HashSet::new();
        for name in group {
            if !known_names.contains(name) {
                return Err(BlockadeError::UsageError(format!(
                    "unknown container '{}' in partition",
                    name
                )));
            }
            seen.insert(name.clone());
            set.insert(name.clone());
        }
        if !set.is_empty() {
            result.push(set);
        }
    }

    let leftover: PartitionSet = known_names.difference(&seen).cloned().collect();
    if !leftover.is_empty() {
        result.push(leftover);
    }

    Ok(result)
}

/// Resolve overlapping partition requests into disjoint chain groups.
///
/// This is the authoritative overlap-resolution algorithm: a later
/// partition that shares a container with an earlier one "wins" that
/// container — the container is removed from its earlier group and placed
/// into its own singleton group, so every group that actually gets built as
/// an iptables chain is pairwise disjoint. `holy` containers are expanded
/// out to be reachable from every other group (handled by the caller when
/// applying the groups, not here), `neutral` containers are left out of
/// chaos targeting elsewhere, not here.
pub fn chain_groups(partitions: &[PartitionSet]) -> Vec<PartitionSet> {
    let mut groups: Vec<PartitionSet> = Vec::new();

    for part in partitions {
        let mut remaining = part.clone();

        // If a container in `part` already landed in an earlier group,
        // pull it out into its own singleton group and drop it from the
        // group being built here.
        for existing in groups.iter_mut() {
            let overlap: Vec<String> = existing.intersection(&remaining).cloned().collect();
            if !overlap.is_empty() {
                for name in &overlap {
                    existing.remove(name);
                    remaining.remove(name);
                }
                // Each overlapping container gets promoted to its own group.
                // Defer insertion until after the scan so we don't mutate
                // `groups` while iterating it further below.
                for name in overlap {
                    groups.push(PartitionSet::from_iter([name]));
                }
            }
        }

        groups.retain(|g| !g.is_empty());

        if !remaining.is_empty() {
            groups.push(remaining);
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> PartitionSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn chain_name_round_trips() {
        let name = partition_chain_name("abc", 7);
        assert_eq!(parse_partition_index("abc", &name), Some(7));
    }

    #[test]
    fn chain_name_truncates_long_topology_ids() {
        // Example from the spec: the full prefix+id is truncated to 25
        // characters before the `-p<n>` suffix is appended.
        let id = "abc123awhopbopaloobopalopbamboom";
        let name = partition_chain_name(id, 1);
        assert_eq!(name, "blockade-abc123awhopbopal-p1");
    }

    #[test]
    fn parse_partition_index_rejects_other_topologies() {
        let name = partition_chain_name("abc", 3);
        assert_eq!(parse_partition_index("xyz", &name), None);
    }

    #[test]
    fn parse_partition_index_rejects_non_chain_names() {
        assert_eq!(parse_partition_index("abc123", "not-a-chain"), None);
    }

    #[test]
    fn expand_partitions_appends_leftover_group() {
        let known: HashSet<String> = set(&["a", "b", "c"]);
        let partitions = vec![vec!["a".to_string()]];
        let expanded = expand_partitions(&known, &partitions).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.iter().any(|g| g == &set(&["a"])));
        assert!(expanded.iter().any(|g| g == &set(&["b", "c"])));
    }

    #[test]
    fn expand_partitions_rejects_unknown_container() {
        let known: HashSet<String> = set(&["a", "b"]);
        let partitions = vec![vec!["z".to_string()]];
        assert!(expand_partitions(&known, &partitions).is_err());
    }

    #[test]
    fn expand_partitions_allows_overlap_for_chain_groups_to_resolve() {
        let known: HashSet<String> = set(&["a", "b"]);
        let partitions = vec![vec!["a".to_string()], vec!["a".to_string(), "b".to_string()]];
        let expanded = expand_partitions(&known, &partitions).unwrap();
        assert_eq!(expanded.len(), 2);
        let groups = chain_groups(&expanded);
        // 'a' is promoted to its own singleton; 'b' remains with the second input set.
        assert!(groups.iter().any(|g| g == &set(&["a"])));
        assert!(groups.iter().any(|g| g == &set(&["b"])));
    }

    #[test]
    fn chain_groups_resolves_overlap_to_singleton() {
        let partitions = vec![set(&["a", "b", "c"]), set(&["b", "d"])];
        let groups = chain_groups(&partitions);
        // b moves to its own singleton group; the first group keeps a, c;
        // the second group keeps d.
        assert!(groups.iter().any(|g| g == &set(&["b"])));
        assert!(groups.iter().any(|g| g == &set(&["a", "c"])));
        assert!(groups.iter().any(|g| g == &set(&["d"])));
    }

    #[test]
    fn chain_groups_disjoint_partitions_pass_through() {
        let partitions = vec![set(&["a", "b"]), set(&["c", "d"])];
        let groups = chain_groups(&partitions);
        assert_eq!(groups.len(), 2);
    }
}
