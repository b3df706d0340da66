use std::{cmp::{Ordering, Reverse}, collections::BTreeSet, hash::Hash};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

///
/// Accumulated indicator of one candidate (a point or a subspace).
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry
{
    pub accumulated_error: f64,
    pub contribution_count: usize,
    pub admissible: bool,
}

impl ErrorEntry
{
    ///
    /// Mean contribution, the value compared against thresholds.
    ///
    #[inline]
    pub fn contrib_per_point(&self) -> f64
    {
        self.accumulated_error / self.contribution_count.max(1) as f64
    }
}

#[derive(Clone, Copy, Debug)]
struct SortValue(f64);

impl PartialEq for SortValue
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for SortValue {}
impl PartialOrd for SortValue
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SortValue
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

///
/// Hash map from key to `ErrorEntry` paired with an index of the admissible
/// entries sorted by mean contribution. Every change of an admissible entry
/// removes and reinserts it in the index so both views agree. Among equal
/// values the smallest key is popped first.
///
pub struct ErrorStorage<K: Hash + Eq + Ord + Clone>
{
    entries: FxHashMap<K, ErrorEntry>,
    sorted: BTreeSet<(SortValue, Reverse<K>)>,
}

impl<K: Hash + Eq + Ord + Clone> Default for ErrorStorage<K>
{
    fn default() -> Self {
        Self { entries: FxHashMap::default(), sorted: BTreeSet::new() }
    }
}

impl<K: Hash + Eq + Ord + Clone> ErrorStorage<K>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<&ErrorEntry>
    {
        self.entries.get(key)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool
    {
        self.entries.contains_key(key)
    }

    ///
    /// Number of entries in the sorted index (the admissible ones).
    ///
    #[inline]
    pub fn num_admissible(&self) -> usize
    {
        self.sorted.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &ErrorEntry)>
    {
        self.entries.iter()
    }

    pub fn clear(&mut self)
    {
        self.entries.clear();
        self.sorted.clear();
    }

    ///
    /// Add one contribution, creating the entry (inadmissible) if needed.
    ///
    pub fn add_contribution(&mut self, key: &K, value: f64)
    {
        self.update(key, value, 1);
    }

    ///
    /// Replace an earlier contribution `old_value` of the entry by `new_value`
    /// without changing the contribution count.
    ///
    pub fn replace_contribution(&mut self, key: &K, old_value: f64, new_value: f64)
    {
        self.update(key, new_value - old_value, 0);
    }

    fn update(&mut self, key: &K, delta: f64, count: usize)
    {
        let entry = self.entries.entry(key.clone()).or_default();
        let old = *entry;
        entry.accumulated_error += delta;
        entry.contribution_count += count;
        let new = *entry;
        if old.admissible
        {
            self.sorted.remove(&(SortValue(old.contrib_per_point()), Reverse(key.clone())));
            self.sorted.insert((SortValue(new.contrib_per_point()), Reverse(key.clone())));
        }
    }

    ///
    /// Update the admissibility of an existing entry. Returns false if there
    /// is no entry for `key`.
    ///
    pub fn set_admissible(&mut self, key: &K, admissible: bool) -> bool
    {
        let Some(entry) = self.entries.get_mut(key) else
        {
            return false;
        };
        if entry.admissible != admissible
        {
            entry.admissible = admissible;
            let sort_key = (SortValue(entry.contrib_per_point()), Reverse(key.clone()));
            if admissible
            {
                self.sorted.insert(sort_key);
            }
            else
            {
                self.sorted.remove(&sort_key);
            }
        }
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<ErrorEntry>
    {
        let entry = self.entries.remove(key)?;
        if entry.admissible
        {
            self.sorted.remove(&(SortValue(entry.contrib_per_point()), Reverse(key.clone())));
        }
        Some(entry)
    }

    ///
    /// The admissible entry with the largest mean contribution.
    ///
    pub fn peek_largest(&self) -> Option<(&K, &ErrorEntry)>
    {
        let (_, Reverse(key)) = self.sorted.last()?;
        self.entries.get_key_value(key)
    }

    pub fn pop_largest(&mut self) -> Option<(K, ErrorEntry)>
    {
        let (_, Reverse(key)) = self.sorted.pop_last()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry))
    }
}

#[test]
fn check_entry_mean()
{
    let entry = ErrorEntry { accumulated_error: 3.0, contribution_count: 0, admissible: false };
    assert_eq!(entry.contrib_per_point(), 3.0);
    let entry = ErrorEntry { accumulated_error: 3.0, contribution_count: 4, admissible: false };
    assert_eq!(entry.contrib_per_point(), 0.75);
}

#[test]
fn check_sorted_index_follows_updates()
{
    let mut storage: ErrorStorage<u32> = ErrorStorage::new();
    storage.add_contribution(&1, 4.0);
    storage.add_contribution(&2, 1.0);
    storage.add_contribution(&3, 3.0);
    assert!(storage.peek_largest().is_none());
    assert!(storage.set_admissible(&1, true));
    assert!(storage.set_admissible(&2, true));
    assert!(!storage.set_admissible(&9, true));
    assert_eq!(storage.peek_largest().map(|(k, _)| *k), Some(1));
    // mean of entry 1 drops to 2.0, below entry 2 raised to 2.5
    storage.add_contribution(&1, 0.0);
    storage.add_contribution(&2, 4.0);
    assert_eq!(storage.num_admissible(), 2);
    assert_eq!(storage.peek_largest().map(|(k, e)| (*k, e.contrib_per_point())), Some((2, 2.5)));
    storage.set_admissible(&3, true);
    let order: Vec<u32> = std::iter::from_fn(|| storage.pop_largest().map(|(k, _)| k)).collect();
    assert_eq!(order, vec![3, 2, 1]);
    assert!(storage.is_empty());
}

#[test]
fn check_replaced_contribution_keeps_count()
{
    let mut storage: ErrorStorage<u32> = ErrorStorage::new();
    storage.add_contribution(&1, 1.0);
    storage.add_contribution(&1, 3.0);
    storage.add_contribution(&2, 2.5);
    storage.set_admissible(&1, true);
    storage.set_admissible(&2, true);
    assert_eq!(storage.peek_largest().map(|(k, _)| *k), Some(2));
    storage.replace_contribution(&1, 1.0, 5.0);
    let entry = storage.get(&1).copied().unwrap();
    assert_eq!((entry.accumulated_error, entry.contribution_count), (8.0, 2));
    assert_eq!(storage.peek_largest().map(|(k, e)| (*k, e.contrib_per_point())), Some((1, 4.0)));
}

#[test]
fn check_remove_and_ties()
{
    let mut storage: ErrorStorage<u32> = ErrorStorage::new();
    for key in [5, 4, 6]
    {
        storage.add_contribution(&key, 1.0);
        storage.set_admissible(&key, true);
    }
    assert_eq!(storage.remove(&4).map(|e| e.contribution_count), Some(1));
    assert_eq!(storage.num_admissible(), 2);
    assert_eq!(storage.pop_largest().map(|(k, _)| k), Some(5));
    storage.set_admissible(&6, false);
    assert_eq!(storage.num_admissible(), 0);
    assert_eq!(storage.len(), 1);
}
