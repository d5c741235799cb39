//! Insertion order for a system restore.
//!
//! Kahn's algorithm over the foreign-key graph restricted to the captured
//! tables. Ties are broken lexicographically so the same snapshot always
//! restores in the same order.

use std::collections::{BTreeMap, BTreeSet};

use super::repository::ForeignKeyEdge;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    /// Every captured table exactly once, parents before children.
    pub order: Vec<String>,
    /// Tables caught in a reference cycle, appended to the end of `order`
    /// in name order. Their relative order is not checked against the
    /// constraints.
    pub unresolved: Vec<String>,
}

impl RestorePlan {
    pub fn has_cycles(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

pub fn restore_order<S: AsRef<str>>(tables: &[S], edges: &[ForeignKeyEdge]) -> RestorePlan {
    let captured: BTreeSet<&str> = tables.iter().map(AsRef::as_ref).collect();

    let mut in_degree: BTreeMap<&str, usize> = captured.iter().map(|t| (*t, 0)).collect();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> =
        captured.iter().map(|t| (*t, BTreeSet::new())).collect();

    for edge in edges {
        let (child, parent) = (edge.from_table.as_str(), edge.to_table.as_str());
        // A self reference does not constrain the order between tables.
        if child == parent || !captured.contains(child) || !captured.contains(parent) {
            continue;
        }
        if let Some(children) = dependents.get_mut(parent) {
            if children.insert(child) {
                *in_degree.entry(child).or_default() += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(table, _)| *table)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(captured.len());
    while let Some(current) = ready.pop_first() {
        order.push(current.to_string());
        if let Some(children) = dependents.get(current) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    let placed: BTreeSet<String> = order.iter().cloned().collect();
    let unresolved: Vec<String> = captured
        .iter()
        .filter(|t| !placed.contains(**t))
        .map(|t| t.to_string())
        .collect();
    order.extend(unresolved.iter().cloned());

    RestorePlan { order, unresolved }
}
