//! Desired vs observed diffing, gated on ownership.
//!
//! [`compute`] pairs declared items with remote records and returns what to
//! create, update and delete. Remote records are only ever scheduled for
//! deletion when they match something recorded in the ownership snapshot:
//! resources created outside the engine are never touched.

use std::collections::HashSet;

/// Category-specific identity rules.
pub trait Matcher {
    type Desired;
    type Observed;

    /// Whether a declared item and a remote record are the same resource.
    fn matches(&self, desired: &Self::Desired, observed: &Self::Observed) -> bool;

    /// Natural key of a declared item, used to collapse duplicate
    /// declarations. `None` for items without a key yet.
    fn desired_key(&self, desired: &Self::Desired) -> Option<String>;

    /// Provider-assigned id; observed records are considered in this order.
    fn observed_id(&self, observed: &Self::Observed) -> String;

    /// Whether an unmatched declared item may take over any unkeyed record.
    fn positional(&self, _desired: &Self::Desired) -> bool {
        false
    }

    /// Whether a remote record carries no natural key yet.
    fn observed_unkeyed(&self, _observed: &Self::Observed) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diff<D, O> {
    pub to_create: Vec<D>,
    pub to_update: Vec<(O, D)>,
    pub to_delete: Vec<O>,
}

impl<D, O> Diff<D, O> {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

enum Slot {
    Matched(usize),
    Unmatched,
    Collapsed,
}

/// Diff declared items against remote records.
///
/// * Keyed pass: each declared item claims the first unclaimed record (in
///   id order) it matches. A declared item whose key was already seen is
///   collapsed into the first one.
/// * Positional pass: unmatched declared items that allow it take unkeyed
///   records, again in id order.
/// * Everything still unclaimed is deleted if it matches an owned item.
///   Unkeyed records are deleted only as far as owned positional items
///   outnumber the declared ones that took a record.
pub fn compute<M>(
    matcher: &M,
    desired: &[M::Desired],
    observed: &[M::Observed],
    owned: &[M::Desired],
) -> Diff<M::Desired, M::Observed>
where
    M: Matcher,
    M::Desired: Clone,
    M::Observed: Clone,
{
    let mut order: Vec<usize> = (0..observed.len()).collect();
    order.sort_by_cached_key(|&i| matcher.observed_id(&observed[i]));

    let mut claimed = vec![false; observed.len()];
    let mut seen = HashSet::new();
    let mut slots = Vec::with_capacity(desired.len());

    for item in desired {
        if let Some(key) = matcher.desired_key(item) {
            if !seen.insert(key) {
                slots.push(Slot::Collapsed);
                continue;
            }
        }
        match order
            .iter()
            .copied()
            .find(|&i| !claimed[i] && matcher.matches(item, &observed[i]))
        {
            Some(i) => {
                claimed[i] = true;
                slots.push(Slot::Matched(i));
            }
            None => slots.push(Slot::Unmatched),
        }
    }

    let pool: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&i| !claimed[i] && matcher.observed_unkeyed(&observed[i]))
        .collect();
    let mut pool = pool.into_iter();
    let mut positional_taken = 0;
    for (slot, item) in slots.iter_mut().zip(desired) {
        if matches!(slot, Slot::Unmatched) && matcher.positional(item) {
            if let Some(i) = pool.next() {
                claimed[i] = true;
                positional_taken += 1;
                *slot = Slot::Matched(i);
            }
        }
    }

    let mut diff = Diff {
        to_create: Vec::new(),
        to_update: Vec::new(),
        to_delete: Vec::new(),
    };
    for (slot, item) in slots.into_iter().zip(desired) {
        match slot {
            Slot::Matched(i) => diff.to_update.push((observed[i].clone(), item.clone())),
            Slot::Unmatched => diff.to_create.push(item.clone()),
            Slot::Collapsed => {}
        }
    }

    // Owned positional items recorded without a key stand for unkeyed
    // records; those not taken by a declared item may be deleted. An owned
    // keyed item whose record is gone stands for nothing.
    let owned_unkeyed = owned
        .iter()
        .filter(|o| {
            matcher.positional(o)
                && matcher.desired_key(o).is_none()
                && !observed.iter().any(|obs| matcher.matches(o, obs))
        })
        .count();
    let mut budget = owned_unkeyed.saturating_sub(positional_taken);

    for &i in &order {
        if claimed[i] {
            continue;
        }
        let record = &observed[i];
        if owned.iter().any(|o| matcher.matches(o, record)) {
            diff.to_delete.push(record.clone());
        } else if budget > 0 && matcher.observed_unkeyed(record) {
            budget -= 1;
            diff.to_delete.push(record.clone());
        }
    }

    diff
}
