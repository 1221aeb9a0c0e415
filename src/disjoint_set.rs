use std::collections::{BTreeMap, BTreeSet};

/// Groups of items linked by pairwise matches. Every pair passed to `insert`
/// ends up in the same set, so sets are the transitive closure of the matches.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet<T>
where
    T: Ord,
{
    // Maps an item to the index of the entry holding its whole group
    map: BTreeMap<T, usize>,
    entries: Vec<BTreeSet<T>>,
}

impl<T> DisjointSet<T>
where
    T: Ord + Clone,
{
    pub fn insert(&mut self, p1: T, p2: T) {
        let (p1_idx, p2_idx) = (self.map.get(&p1).copied(), self.map.get(&p2).copied());

        // already linked
        if p1_idx.is_some() && p1_idx == p2_idx {
            return;
        }

        match (p1_idx, p2_idx) {
            (None, None) => self.insert_new_entry([p1, p2]),
            (None, Some(idx)) | (Some(idx), None) => self.append_to_entry(idx, [p1, p2]),
            (Some(idx_1), Some(idx_2)) => self.merge_entries(idx_1, idx_2),
        }
    }

    fn append_to_entry(&mut self, idx: usize, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.entries[idx].insert(item.clone());
            self.map.insert(item, idx);
        }
    }

    fn insert_new_entry(&mut self, items: impl IntoIterator<Item = T>) {
        let entry = items.into_iter().collect::<BTreeSet<_>>();
        let idx = self.entries.len();
        for item in entry.iter().cloned() {
            self.map.insert(item, idx);
        }
        self.entries.push(entry);
    }

    // Fold the higher-indexed entry into the lower one. The removal may move
    // the last entry into the freed slot, so the lower index stays valid.
    fn merge_entries(&mut self, idx_1: usize, idx_2: usize) {
        let (keep_idx, remove_idx) = if idx_1 < idx_2 {
            (idx_1, idx_2)
        } else {
            (idx_2, idx_1)
        };

        let removed = self.entries.swap_remove(remove_idx);
        if remove_idx < self.entries.len() {
            for item in self.entries[remove_idx].iter() {
                self.map.insert(item.clone(), remove_idx);
            }
        }
        for item in removed {
            self.map.insert(item.clone(), keep_idx);
            self.entries[keep_idx].insert(item);
        }
    }

    pub fn into_sets(self) -> Vec<BTreeSet<T>> {
        self.entries
    }
}
