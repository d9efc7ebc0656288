//! Duplicate merging and dense renumbering

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::pdf::{Document, Object, ObjectId};

/// Old to new object numbers for one rewrite
///
/// A number mapped to 0 is not written. `inverse` holds the surviving
/// original for every new number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberMap {
    forward: BTreeMap<u32, u32>,
    inverse: BTreeMap<u32, u32>,
}

impl RenumberMap {
    /// Every number in `used` keeps its number
    pub fn identity(used: &BTreeSet<u32>) -> Self {
        let forward: BTreeMap<u32, u32> = used.iter().map(|&n| (n, n)).collect();
        let inverse = forward.clone();
        Self { forward, inverse }
    }

    /// New number for `old`, 0 when it is not written
    pub fn get(&self, old: u32) -> u32 {
        self.forward.get(&old).copied().unwrap_or(0)
    }

    /// Original number written as `new`
    pub fn original(&self, new: u32) -> Option<u32> {
        self.inverse.get(&new).copied()
    }

    /// New numbers in ascending order with their originals
    pub fn written(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.inverse.iter().map(|(&new, &old)| (new, old))
    }

    /// Whether every written object keeps its number
    pub fn is_identity(&self) -> bool {
        self.forward.iter().all(|(old, new)| *new == 0 || old == new)
    }

    /// Number of originals folded into another object
    pub fn merged(&self) -> usize {
        self.forward
            .iter()
            .filter(|(old, new)| **new != 0 && self.inverse.get(new) != Some(old))
            .count()
    }

    /// One past the highest new number
    pub fn size(&self) -> u32 {
        self.inverse.keys().next_back().map_or(1, |n| n + 1)
    }

    /// Follow merges from `old` until a survivor
    fn survivor(&self, old: u32) -> u32 {
        let mut current = old;
        for _ in 0..=self.forward.len() {
            match self.forward.get(&current) {
                Some(&next) if next != current && next != 0 => current = next,
                _ => return current,
            }
        }
        warn!("Merge chain from {} does not settle", old);
        current
    }
}

/// Merge structurally identical objects into the lowest-numbered copy
///
/// Every pair of used non-stream objects is compared; references compare
/// by id, not by target. With `include_streams`, streams with equal
/// dictionaries and equal stored bytes are merged as well.
pub fn dedup(doc: &mut Document, used: &BTreeSet<u32>, include_streams: bool) -> RenumberMap {
    let mut candidates: Vec<(u32, Object, Option<Vec<u8>>)> = Vec::new();
    for &number in used {
        let id = ObjectId::new(number, doc.get_entry(number).map_or(0, |e| e.generation()));
        let Ok(object) = doc.resolve(id) else { continue };
        match &*object {
            Object::Stream(stream) if include_streams => {
                if let Ok(bytes) = doc.raw_stream(id, stream) {
                    candidates.push((number, Object::Dictionary(stream.dict.clone()), Some(bytes)));
                }
            }
            Object::Stream(_) => {}
            other => candidates.push((number, other.clone(), None)),
        }
    }

    let mut map = RenumberMap::identity(used);
    let mut survivors: Vec<usize> = Vec::new();
    for (i, (number, object, bytes)) in candidates.iter().enumerate() {
        let duplicate_of = survivors.iter().map(|&s| &candidates[s]).find(|(_, other, other_bytes)| {
            other == object && other_bytes == bytes
        });
        match duplicate_of {
            Some((keep, _, _)) => {
                map.forward.insert(*number, *keep);
                map.inverse.remove(number);
            }
            None => survivors.push(i),
        }
    }

    debug!("Dedup merged {} objects", map.merged());
    map
}

/// Number survivors densely from 1 in ascending original order
///
/// Merged numbers follow their survivor to its new number.
pub fn compact(used: &BTreeSet<u32>, merges: &RenumberMap) -> RenumberMap {
    let mut map = RenumberMap::default();
    let mut next = 1u32;
    for &old in used {
        if merges.survivor(old) == old {
            map.forward.insert(old, next);
            map.inverse.insert(next, old);
            next += 1;
        }
    }
    for &old in used {
        let survivor = merges.survivor(old);
        if survivor != old {
            let target = map.forward.get(&survivor).copied().unwrap_or(0);
            map.forward.insert(old, target);
        }
    }
    debug!("Compacted {} objects into {}", used.len(), next - 1);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn set(numbers: &[u32]) -> BTreeSet<u32> {
        numbers.iter().copied().collect()
    }

    #[test]
    fn test_compact_is_dense() {
        let used = set(&[2, 5, 9]);
        let map = compact(&used, &RenumberMap::identity(&used));
        assert_eq!(map.get(2), 1);
        assert_eq!(map.get(5), 2);
        assert_eq!(map.get(9), 3);
        assert_eq!(map.get(4), 0);
        assert_eq!(map.original(3), Some(9));
        assert_eq!(map.size(), 4);
    }

    #[test]
    fn test_compact_of_compact_is_noop() {
        let used = set(&[1, 2, 3, 4]);
        let map = compact(&used, &RenumberMap::identity(&used));
        assert!(map.is_identity());
        for n in used {
            assert_eq!(map.get(n), n);
        }
    }

    #[test]
    fn test_compact_follows_merge_chains() {
        let used = set(&[1, 3, 6, 8]);
        let mut merges = RenumberMap::identity(&used);
        // 8 merged into 6, 6 merged into 3
        merges.forward.insert(8, 6);
        merges.forward.insert(6, 3);
        merges.inverse.remove(&8);
        merges.inverse.remove(&6);

        let map = compact(&used, &merges);
        assert_eq!(map.get(1), 1);
        assert_eq!(map.get(3), 2);
        assert_eq!(map.get(6), 2);
        assert_eq!(map.get(8), 2);
        assert_eq!(map.written().collect::<Vec<_>>(), vec![(1, 1), (2, 3)]);
        assert_eq!(map.merged(), 2);
    }

    #[test]
    fn test_merge_map_is_idempotent() {
        let used = set(&[1, 2, 3]);
        let mut merges = RenumberMap::identity(&used);
        merges.forward.insert(3, 1);
        merges.inverse.remove(&3);
        for n in used {
            let once = merges.get(n);
            assert_eq!(merges.get(once), once);
        }
    }
}
