//! Crawl frontier: pending addresses plus the visited set.
//!
//! Only the engine's coordinator touches it, so claiming and suggestion
//! merging never race.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use alloy_primitives::Address;

use crate::config::ContractOverrides;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PendingItem {
    /// Union of the templates every referrer suggested so far.
    pub templates: BTreeSet<String>,
    /// Seed overrides; relatives use the project-wide ones.
    pub overrides: Option<ContractOverrides>,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Frontier {
    queue: VecDeque<Address>,
    pending: HashMap<Address, PendingItem>,
    visited: HashSet<Address>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seed at depth 0. A repeated seed keeps its first overrides.
    pub fn push_seed(&mut self, address: Address, overrides: Option<ContractOverrides>) {
        if self.visited.contains(&address) {
            return;
        }
        match self.pending.get_mut(&address) {
            Some(item) => {
                item.depth = 0;
                if item.overrides.is_none() {
                    item.overrides = overrides;
                }
            }
            None => {
                self.queue.push_back(address);
                self.pending.insert(
                    address,
                    PendingItem {
                        templates: BTreeSet::new(),
                        overrides,
                        depth: 0,
                    },
                );
            }
        }
    }

    /// Offers a relative. Returns `false` when the address was already claimed,
    /// in which case the suggestions are dropped.
    pub fn offer(&mut self, address: Address, templates: &BTreeSet<String>, depth: usize) -> bool {
        if self.visited.contains(&address) {
            return false;
        }
        let item = self.pending.entry(address).or_insert_with(|| {
            self.queue.push_back(address);
            PendingItem {
                templates: BTreeSet::new(),
                overrides: None,
                depth,
            }
        });
        item.templates.extend(templates.iter().cloned());
        item.depth = item.depth.min(depth);
        true
    }

    /// Merges suggestions into `address` if it is still pending. The entry
    /// keeps its depth.
    pub fn merge_if_pending(&mut self, address: Address, templates: &BTreeSet<String>) -> bool {
        match self.pending.get_mut(&address) {
            Some(item) => {
                item.templates.extend(templates.iter().cloned());
                true
            }
            None => false,
        }
    }

    /// Takes the oldest pending address and marks it visited.
    pub fn claim(&mut self) -> Option<(Address, PendingItem)> {
        let address = self.queue.pop_front()?;
        let item = self.pending.remove(&address).unwrap_or_default();
        self.visited.insert(address);
        Some((address, item))
    }

    pub fn is_visited(&self, address: &Address) -> bool {
        self.visited.contains(address)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes every pending entry, oldest first.
    pub fn drain(&mut self) -> Vec<(Address, PendingItem)> {
        let mut pending = std::mem::take(&mut self.pending);
        self.queue
            .drain(..)
            .map(|address| {
                let item = pending.remove(&address).unwrap_or_default();
                (address, item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const A: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const B: Address = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_suggestions_merge_until_claim() {
        let mut frontier = Frontier::new();
        assert!(frontier.offer(A, &set(&["Safe"]), 2));
        assert!(frontier.offer(A, &set(&["Multisig"]), 1));

        let (address, item) = frontier.claim().unwrap();
        assert_eq!(address, A);
        assert_eq!(item.templates, set(&["Multisig", "Safe"]));
        assert_eq!(item.depth, 1);

        assert!(!frontier.offer(A, &set(&["Late"]), 1));
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_claim_is_fifo_and_at_most_once() {
        let mut frontier = Frontier::new();
        frontier.push_seed(A, None);
        frontier.offer(B, &BTreeSet::new(), 1);
        frontier.offer(A, &BTreeSet::new(), 1);

        assert_eq!(frontier.claim().map(|(a, _)| a), Some(A));
        assert_eq!(frontier.claim().map(|(a, _)| a), Some(B));
        assert!(frontier.claim().is_none());

        frontier.push_seed(A, None);
        assert!(frontier.is_empty());
        assert!(frontier.is_visited(&A));
    }

    #[test]
    fn test_seed_keeps_overrides_and_depth_zero() {
        let mut frontier = Frontier::new();
        frontier.offer(A, &set(&["Safe"]), 3);
        frontier.push_seed(A, Some(ContractOverrides::extending("ERC20")));

        let (_, item) = frontier.claim().unwrap();
        assert_eq!(item.depth, 0);
        assert_eq!(item.templates, set(&["Safe"]));
        assert_eq!(item.overrides.unwrap().extends.as_deref(), Some("ERC20"));
    }

    #[test]
    fn test_merge_if_pending_keeps_depth() {
        let mut frontier = Frontier::new();
        assert!(!frontier.merge_if_pending(A, &set(&["Safe"])));

        frontier.offer(A, &set(&["Multisig"]), 1);
        assert!(frontier.merge_if_pending(A, &set(&["Safe"])));

        let (_, item) = frontier.claim().unwrap();
        assert_eq!(item.templates, set(&["Multisig", "Safe"]));
        assert_eq!(item.depth, 1);
        assert!(!frontier.merge_if_pending(A, &set(&["Late"])));
    }

    #[test]
    fn test_drain() {
        let mut frontier = Frontier::new();
        frontier.offer(A, &BTreeSet::new(), 1);
        frontier.offer(B, &BTreeSet::new(), 1);
        frontier.push_seed(B, Some(ContractOverrides::extending("ERC20")));

        let drained = frontier.drain();
        assert_eq!(drained.iter().map(|(a, _)| *a).collect::<Vec<_>>(), vec![A, B]);
        assert!(drained[1].1.overrides.is_some());
        assert!(frontier.claim().is_none());
    }
}
