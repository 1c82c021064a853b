//! # Equivalence Classes
//!
//! Union-find over external ids. Ids are interned to dense slots so the
//! forest itself is two flat vectors; `find` uses path halving and `union`
//! goes by rank.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct Forest {
    slots: FxHashMap<String, u32>,
    names: Vec<String>,
    parent: Vec<u32>,
    rank: Vec<u32>,
    classes: usize,
}

impl Forest {
    fn slot(&mut self, id: &str) -> u32 {
        if let Some(&slot) = self.slots.get(id) {
            return slot;
        }
        let slot = self.names.len() as u32;
        self.slots.insert(id.to_string(), slot);
        self.names.push(id.to_string());
        self.parent.push(slot);
        self.rank.push(0);
        self.classes += 1;
        slot
    }

    fn find(&mut self, mut slot: u32) -> u32 {
        // Path halving: point every other node to its grandparent
        while self.parent[slot as usize] != slot {
            let grandparent = self.parent[self.parent[slot as usize] as usize];
            self.parent[slot as usize] = grandparent;
            slot = grandparent;
        }
        slot
    }

    fn union(&mut self, a: u32, b: u32) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (high, low) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[low as usize] = high;
        if self.rank[high as usize] == self.rank[low as usize] {
            self.rank[high as usize] += 1;
        }
        self.classes -= 1;
        true
    }
}

/// Thread-safe equivalence classes of external ids.
#[derive(Debug, Default)]
pub struct EquivalenceClasses {
    forest: Mutex<Forest>,
}

impl EquivalenceClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the classes of two ids. Returns false if they were already
    /// in the same class.
    pub fn add_link(&self, id1: &str, id2: &str) -> bool {
        let mut forest = self.forest.lock();
        let a = forest.slot(id1);
        let b = forest.slot(id2);
        forest.union(a, b)
    }

    /// Every id in the class of `id`, sorted. Unknown ids form a singleton.
    pub fn class_of(&self, id: &str) -> Vec<String> {
        let mut forest = self.forest.lock();
        let Some(&slot) = forest.slots.get(id) else {
            return vec![id.to_string()];
        };
        let root = forest.find(slot);
        let mut members = Vec::new();
        for other in 0..forest.names.len() as u32 {
            if forest.find(other) == root {
                members.push(forest.names[other as usize].clone());
            }
        }
        members.sort();
        members
    }

    pub fn same_class(&self, id1: &str, id2: &str) -> bool {
        let mut forest = self.forest.lock();
        match (forest.slots.get(id1).copied(), forest.slots.get(id2).copied()) {
            (Some(a), Some(b)) => forest.find(a) == forest.find(b),
            _ => id1 == id2,
        }
    }

    /// Number of classes among ids seen so far.
    pub fn class_count(&self) -> usize {
        self.forest.lock().classes
    }

    /// All classes, each sorted, ordered by their first member.
    pub fn classes(&self) -> Vec<Vec<String>> {
        let mut forest = self.forest.lock();
        let mut grouped: FxHashMap<u32, Vec<String>> = FxHashMap::default();
        for slot in 0..forest.names.len() as u32 {
            let root = forest.find(slot);
            let name = forest.names[slot as usize].clone();
            grouped.entry(root).or_default().push(name);
        }
        let mut classes: Vec<Vec<String>> = grouped
            .into_values()
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        classes.sort();
        classes
    }
}
