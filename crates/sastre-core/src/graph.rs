// ── Reference graph ──
//
// Directed edges between items following embedded id references. Produces
// the dependency-valid processing order used by restore (referenced first)
// and its reverse used by delete. Rewriting embedded ids is `update_ids`;
// the graph only decides order.
//
// A consistent controller snapshot is acyclic. A cycle means controller
// inconsistency: it is logged as an error and broken at the lowest
// filename-safe name so the rest of the push can proceed.

use std::collections::{BTreeSet, HashMap};

use tracing::{error, warn};

use crate::catalog::{CatalogEntry, Tag, TAG_DELETE_ORDER};
use crate::item::{filename_safe, ConfigItem};

/// In-memory graph over one snapshot of items.
pub struct ReferenceGraph<'a> {
    items: Vec<&'a ConfigItem>,
    /// id -> index into `items`.
    by_id: HashMap<&'a str, usize>,
    /// References per item, as indices into `items`; references to ids
    /// outside the snapshot are kept separately for integrity reporting.
    references: Vec<Vec<usize>>,
    dangling: Vec<(usize, String)>,
}

impl<'a> ReferenceGraph<'a> {
    pub fn new(items: impl IntoIterator<Item = &'a ConfigItem>) -> Self {
        let items: Vec<&ConfigItem> = items.into_iter().collect();
        let by_id: HashMap<&str, usize> = items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| item.id().map(|id| (id, idx)))
            .collect();

        let mut references = Vec::with_capacity(items.len());
        let mut dangling = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let mut targets = Vec::new();
            for reference in item.id_references() {
                match by_id.get(reference.as_str()) {
                    Some(&target) => targets.push(target),
                    None => dangling.push((idx, reference)),
                }
            }
            references.push(targets);
        }

        Self {
            items,
            by_id,
            references,
            dangling,
        }
    }

    /// Look up an item by id.
    pub fn item_by_id(&self, id: &str) -> Option<&'a ConfigItem> {
        self.by_id.get(id).map(|&idx| self.items[idx])
    }

    /// References whose target id is not part of the snapshot. Indicates
    /// controller inconsistency; callers log and continue.
    pub fn dangling_references(&self) -> impl Iterator<Item = (&'a ConfigItem, &str)> + '_ {
        self.dangling
            .iter()
            .map(|(idx, id)| (self.items[*idx], id.as_str()))
    }

    /// Log every dangling reference at warning level.
    pub fn report_dangling(&self) {
        for (item, reference) in self.dangling_references() {
            warn!(
                kind = item.entry.kind,
                name = item.name().unwrap_or("<unnamed>"),
                reference,
                "reference target missing from snapshot"
            );
        }
    }

    /// Kinds present in the snapshot in push order (referenced kinds first).
    ///
    /// Tags follow the reverse of the catalog delete order; within a tag,
    /// kinds are ordered by the cross-kind references observed at runtime,
    /// ties broken by kind name for reproducible runs.
    pub fn topo_kinds(&self) -> Vec<&'static CatalogEntry> {
        let mut out = Vec::new();
        for &tag in TAG_DELETE_ORDER.iter().rev() {
            let entries = self.tag_entries(tag);
            out.extend(self.order_tag_entries(entries));
        }
        out
    }

    /// Items of one kind in reference order: within the kind, an item comes
    /// after everything it references. Ties break by filename-safe name.
    pub fn topo_items(&self, kind: &str) -> Vec<&'a ConfigItem> {
        let members: Vec<usize> = (0..self.items.len())
            .filter(|&idx| self.items[idx].entry.kind == kind)
            .collect();
        let order = topo_order(
            &members,
            |idx| {
                self.references[idx]
                    .iter()
                    .copied()
                    .filter(|&target| self.items[target].entry.kind == kind)
                    .collect()
            },
            |idx| sort_key(self.items[idx]),
            |idx| {
                error!(
                    kind,
                    name = self.items[idx].name().unwrap_or("<unnamed>"),
                    "reference cycle detected, breaking at lowest name"
                );
            },
        );
        order.into_iter().map(|idx| self.items[idx]).collect()
    }

    fn tag_entries(&self, tag: Tag) -> Vec<&'static CatalogEntry> {
        let mut entries: Vec<&'static CatalogEntry> = Vec::new();
        for item in &self.items {
            if item.entry.tag == tag && !entries.iter().any(|e| e.kind == item.entry.kind) {
                entries.push(item.entry);
            }
        }
        entries.sort_by_key(|e| e.kind);
        entries
    }

    /// Order kinds within one tag by observed cross-kind references.
    fn order_tag_entries(
        &self,
        entries: Vec<&'static CatalogEntry>,
    ) -> Vec<&'static CatalogEntry> {
        if entries.len() <= 1 {
            return entries;
        }
        let index_of: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.kind, idx))
            .collect();

        // kind -> set of kinds it references (within this tag).
        let mut kind_refs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); entries.len()];
        for (idx, item) in self.items.iter().enumerate() {
            let Some(&from) = index_of.get(item.entry.kind) else {
                continue;
            };
            for &target in &self.references[idx] {
                if let Some(&to) = index_of.get(self.items[target].entry.kind) {
                    if to != from {
                        kind_refs[from].insert(to);
                    }
                }
            }
        }

        let members: Vec<usize> = (0..entries.len()).collect();
        let order = topo_order(
            &members,
            |idx| kind_refs[idx].iter().copied().collect(),
            |idx| (entries[idx].kind.to_owned(), String::new()),
            |idx| {
                error!(kind = entries[idx].kind, "kind-level reference cycle, breaking");
            },
        );
        order.into_iter().map(|idx| entries[idx]).collect()
    }
}

fn sort_key(item: &ConfigItem) -> (String, String) {
    (
        filename_safe(item.name().unwrap_or_default()),
        item.id().unwrap_or_default().to_owned(),
    )
}

/// Kahn's algorithm over an arbitrary node set: nodes whose references are
/// satisfied come first; among ready nodes the smallest key wins. When no
/// node is ready but some remain, `on_cycle` fires and the smallest-keyed
/// remaining node is forced out.
pub(crate) fn topo_order<K: Ord>(
    members: &[usize],
    refs_of: impl Fn(usize) -> Vec<usize>,
    key_of: impl Fn(usize) -> K,
    on_cycle: impl Fn(usize),
) -> Vec<usize> {
    let member_set: BTreeSet<usize> = members.iter().copied().collect();
    let mut pending: BTreeSet<usize> = member_set.clone();
    let mut done: BTreeSet<usize> = BTreeSet::new();
    let mut out = Vec::with_capacity(members.len());

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .copied()
            .filter(|&idx| {
                refs_of(idx)
                    .into_iter()
                    .filter(|t| member_set.contains(t))
                    .all(|t| done.contains(&t))
            })
            .min_by_key(|&idx| key_of(idx));

        let next = match ready {
            Some(idx) => idx,
            None => {
                // Cycle: force the smallest-keyed node out.
                let Some(forced) = pending.iter().copied().min_by_key(|&idx| key_of(idx)) else {
                    break;
                };
                on_cycle(forced);
                forced
            }
        };
        pending.remove(&next);
        done.insert(next);
        out.push(next);
    }
    out
}
