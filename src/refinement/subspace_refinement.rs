use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{errors::SGError, storage::{GridPoint, SparseGridData}, subspace::Subspace};

use super::{error_storage::ErrorStorage, functor::RefinementFunctor, hash_refinement::{AbstractRefinement, CandidateFilter, RefinementCandidate}, selection::BoundedSelection};

///
/// Cheap identity of a storage state: the point count and the XOR of all
/// point keys. Used to notice that the grid was changed by someone else
/// between two rounds.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StorageFingerprint
{
    len: usize,
    keys: u64,
}

impl StorageFingerprint
{
    fn of(storage: &SparseGridData) -> Self
    {
        let keys = storage.nodes().fold(0_u64, |acc, node| acc ^ crate::storage::point_key(node.level(), node.index()));
        Self { len: storage.len(), keys }
    }
}

///
/// Decorator refining whole subspaces instead of single points.
///
/// Every candidate child reported by the wrapped strategy adds its indicator
/// value once to the entry of its subspace; a child with several stored
/// parents adds the largest of their values. A subspace is admissible when, in
/// every dimension with level above one, the subspace one level coarser is
/// complete. Each round pops the admissible subspace with the largest mean
/// contribution until the budget is used up or the functor rejects the value.
///
/// The error storage is kept between rounds and updated locally from the
/// points each creation adds. It is rebuilt from a full scan on the first
/// round, after `reset()`, and whenever the storage was modified elsewhere.
/// Call `reset()` when the indicator values of known candidates change, for
/// example after new residuals were set.
///
pub struct SubspaceRefinement<R: AbstractRefinement>
{
    inner: R,
    errors: ErrorStorage<Subspace>,
    // stored points per level vector
    counts: FxHashMap<Subspace, u64>,
    // candidate points and the value each added to `errors`
    counted: FxHashMap<GridPoint, f64>,
    fingerprint: Option<StorageFingerprint>,
}

impl<R: AbstractRefinement> SubspaceRefinement<R>
{
    pub fn new(inner: R) -> Self
    {
        Self { inner, errors: ErrorStorage::new(), counts: FxHashMap::default(), counted: FxHashMap::default(), fingerprint: None }
    }

    pub fn inner(&self) -> &R
    {
        &self.inner
    }

    pub fn error_storage(&self) -> &ErrorStorage<Subspace>
    {
        &self.errors
    }

    ///
    /// Forget all accumulated errors. The next round rebuilds them.
    ///
    pub fn reset(&mut self)
    {
        self.errors.clear();
        self.counts.clear();
        self.counted.clear();
        self.fingerprint = None;
    }

    #[inline]
    fn is_complete(&self, subspace: &Subspace) -> bool
    {
        self.counts.get(subspace).copied().unwrap_or(0) == subspace.num_points()
    }

    pub fn is_admissible(&self, subspace: &Subspace) -> bool
    {
        (0..subspace.num_inputs()).all(|d| subspace.coarser(d).map_or(true, |c| self.is_complete(&c)))
    }

    fn contribute(&mut self, storage: &SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter, candidate: RefinementCandidate, touched: &mut Vec<Subspace>)
    {
        if !filter(&candidate.point)
        {
            return;
        }
        let value = functor.value(storage, &candidate.target());
        if !value.is_finite()
        {
            return;
        }
        let subspace = candidate.point.subspace();
        match self.counted.get_mut(&candidate.point)
        {
            Some(counted) =>
            {
                if value > *counted
                {
                    self.errors.replace_contribution(&subspace, *counted, value);
                    *counted = value;
                    touched.push(subspace);
                }
            },
            None =>
            {
                self.errors.add_contribution(&subspace, value);
                self.counted.insert(candidate.point, value);
                touched.push(subspace);
            }
        }
    }

    fn update_admissibility(&mut self, touched: Vec<Subspace>)
    {
        for subspace in touched
        {
            if self.errors.contains(&subspace)
            {
                let admissible = self.is_admissible(&subspace);
                self.errors.set_admissible(&subspace, admissible);
            }
        }
    }

    fn rebuild(&mut self, storage: &SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter)
    {
        self.reset();
        for node in storage.nodes()
        {
            *self.counts.entry(Subspace::new(node.level())).or_default() += 1;
        }
        let mut candidates = Vec::new();
        self.inner.for_each_candidate(storage, &mut |candidate| candidates.push(candidate));
        let mut touched = Vec::new();
        for candidate in candidates
        {
            self.contribute(storage, functor, filter, candidate, &mut touched);
        }
        self.update_admissibility(touched);
        debug!("subspace error storage rebuilt: {} candidate points in {} subspaces, {} admissible", self.counted.len(), self.errors.len(), self.errors.num_admissible());
    }

    ///
    /// Create every point of `target`, completing its coarser subspaces first.
    ///
    fn create_subspace(&mut self, storage: &mut SparseGridData, target: &Subspace) -> Result<Vec<usize>, SGError>
    {
        let mut added = Vec::new();
        // (subspace, coarser subspaces already pushed)
        let mut worklist = vec![(target.clone(), false)];
        while let Some((subspace, expanded)) = worklist.pop()
        {
            if self.is_complete(&subspace)
            {
                continue;
            }
            if !expanded
            {
                worklist.push((subspace.clone(), true));
                for d in 0..subspace.num_inputs()
                {
                    if let Some(coarser) = subspace.coarser(d).filter(|c| !self.is_complete(c))
                    {
                        worklist.push((coarser, false));
                    }
                }
                continue;
            }
            for point in subspace.points()
            {
                if storage.contains(&point)
                {
                    continue;
                }
                for seq in self.inner.create_point(storage, point)?
                {
                    *self.counts.entry(storage.subspace(seq)).or_default() += 1;
                    added.push(seq);
                }
            }
        }
        Ok(added)
    }

    ///
    /// Local update after `added` points were inserted: completed subspaces
    /// leave the error storage, the new points contribute their candidates
    /// and the neighbours of everything touched are re-checked.
    ///
    fn update_after_creation(&mut self, storage: &SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter, added: &[usize])
    {
        let mut touched = Vec::new();
        for &seq in added
        {
            let point = storage.point(seq);
            self.counted.remove(&point);
            let subspace = point.subspace();
            if self.is_complete(&subspace)
            {
                self.errors.remove(&subspace);
                touched.extend((0..subspace.num_inputs()).filter_map(|d| subspace.finer(d)));
            }
        }
        let mut candidates = Vec::new();
        for &seq in added
        {
            self.inner.for_each_candidate_of(storage, seq, &mut |candidate| candidates.push(candidate));
        }
        for candidate in candidates
        {
            self.contribute(storage, functor, filter, candidate, &mut touched);
        }
        touched.sort_unstable();
        touched.dedup();
        self.update_admissibility(touched);
    }

    fn refine_subspaces(&mut self, storage: &mut SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter) -> Result<Vec<usize>, SGError>
    {
        let mut added = Vec::new();
        let mut created = 0;
        while created < functor.refinements_num()
        {
            let Some((subspace, entry)) = self.errors.peek_largest().map(|(s, e)| (s.clone(), *e)) else
            {
                break;
            };
            let value = entry.contrib_per_point();
            if !functor.accepts(value)
            {
                break;
            }
            self.errors.remove(&subspace);
            trace!("refining subspace {:?} (mean contribution {}, {} contributions)", subspace.level, value, entry.contribution_count);
            let new_points = self.create_subspace(storage, &subspace)?;
            self.update_after_creation(storage, functor, filter, &new_points);
            added.extend(new_points);
            created += 1;
        }
        Ok(added)
    }
}

impl<R: AbstractRefinement> AbstractRefinement for SubspaceRefinement<R>
{
    fn for_each_candidate_of(&self, storage: &SparseGridData, seq: usize, operation: &mut dyn FnMut(RefinementCandidate))
    {
        self.inner.for_each_candidate_of(storage, seq, operation);
    }

    fn for_each_candidate(&self, storage: &SparseGridData, operation: &mut dyn FnMut(RefinementCandidate))
    {
        self.inner.for_each_candidate(storage, operation);
    }

    fn create_point(&self, storage: &mut SparseGridData, point: GridPoint) -> Result<Vec<usize>, SGError>
    {
        self.inner.create_point(storage, point)
    }

    fn collect_candidates(&self, storage: &SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter) -> BoundedSelection<RefinementCandidate>
    {
        self.inner.collect_candidates(storage, functor, filter)
    }

    fn commit_selection(&self, storage: &mut SparseGridData, selection: Vec<(RefinementCandidate, f64)>, functor: &dyn RefinementFunctor) -> Result<Vec<usize>, SGError>
    {
        self.inner.commit_selection(storage, selection, functor)
    }

    fn free_refine_filtered(&mut self, storage: &mut SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter) -> Result<Vec<usize>, SGError>
    {
        if storage.is_empty()
        {
            return Err(SGError::StorageEmpty);
        }
        functor.prepare(storage)?;
        if self.fingerprint != Some(StorageFingerprint::of(storage))
        {
            self.rebuild(storage, functor, filter);
        }
        let result = self.refine_subspaces(storage, functor, filter);
        storage.recalc_leaf_property();
        match result
        {
            Ok(added) =>
            {
                self.fingerprint = Some(StorageFingerprint::of(storage));
                debug!("subspace refinement round: {} points added, {} subspaces pending, grid size {}", added.len(), self.errors.len(), storage.len());
                Ok(added)
            },
            Err(err) =>
            {
                self.fingerprint = None;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
fn all_subspaces_complete(storage: &SparseGridData) -> bool
{
    let mut counts: FxHashMap<Subspace, u64> = FxHashMap::default();
    for seq in 0..storage.len()
    {
        *counts.entry(storage.subspace(seq)).or_default() += 1;
    }
    counts.iter().all(|(subspace, &count)| count == subspace.num_points())
}

#[cfg(test)]
fn same_errors(a: &ErrorStorage<Subspace>, b: &ErrorStorage<Subspace>) -> bool
{
    a.len() == b.len() && a.iter().all(|(key, entry)|
    {
        b.get(key).is_some_and(|other|
        {
            other.contribution_count == entry.contribution_count && other.admissible == entry.admissible &&
            (other.accumulated_error - entry.accumulated_error).abs() < 1e-12
        })
    })
}

#[test]
fn check_whole_subspace_is_created()
{
    use super::{functor::RefinementTarget, hash_refinement::{is_hierarchically_complete, leaf_flags_are_correct, HashRefinement}, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let fun = |_: &SparseGridData, _: &RefinementTarget| 1.0;
    let functor = UserDefinedRefinement::new(&fun, 1, 0.0);
    let mut refinement = SubspaceRefinement::new(HashRefinement);
    let added = refinement.free_refine(&mut storage, &functor).unwrap();
    // equal means: the smaller level vector (1,2) wins
    assert_eq!(added.len(), 2);
    assert!(storage.contains(&GridPoint::new(&[1, 2], &[1, 1], true)));
    assert!(storage.contains(&GridPoint::new(&[1, 2], &[1, 3], true)));
    assert!(is_hierarchically_complete(&storage));
    assert!(leaf_flags_are_correct(&storage));
    assert!(all_subspaces_complete(&storage));
}

#[test]
fn check_inadmissible_subspace_waits()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    storage.insert_point(GridPoint::new(&[2, 1], &[1, 1], true)).unwrap();
    storage.recalc_leaf_property();
    let fun = |storage: &SparseGridData, target: &RefinementTarget| target.coordinates(storage).0[0] as f64;
    let functor = UserDefinedRefinement::new(&fun, 1, 0.0);
    let mut refinement = SubspaceRefinement::new(HashRefinement);
    // (3,1) scores highest but (2,1) is not complete yet
    let added = refinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(added.len(), 1);
    assert!(storage.contains(&GridPoint::new(&[2, 1], &[3, 1], true)));
    assert!(refinement.is_admissible(&Subspace::new(&[3, 1])));
    assert!(!refinement.is_admissible(&Subspace::new(&[2, 2])));
    let added = refinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(added.len(), 4);
    assert_eq!(storage.len(), 7);
    assert!(all_subspaces_complete(&storage));
}

#[test]
fn check_incremental_update_matches_rebuild()
{
    use super::{functor::RefinementTarget, hash_refinement::{is_hierarchically_complete, leaf_flags_are_correct, HashRefinement}, user_defined::UserDefinedRefinement};
    let fun = |storage: &SparseGridData, target: &RefinementTarget|
    {
        let (level, index) = target.coordinates(storage);
        let x: f64 = level.iter().zip(index).map(|(&l, &i)| i as f64 / (1_u64 << l) as f64).product();
        1.0 + x
    };
    let functor = UserDefinedRefinement::new(&fun, 2, 0.0);
    let mut storage = SparseGridData::new(2);
    crate::generators::regular(&mut storage, 2).unwrap();
    let mut refinement = SubspaceRefinement::new(HashRefinement);
    let mut last_len = storage.len();
    for _ in 0..4
    {
        refinement.free_refine(&mut storage, &functor).unwrap();
        assert!(storage.len() > last_len);
        last_len = storage.len();
        let mut fresh = SubspaceRefinement::new(HashRefinement);
        fresh.rebuild(&storage, &functor, &|_| true);
        assert!(same_errors(refinement.error_storage(), fresh.error_storage()));
    }
    assert!(is_hierarchically_complete(&storage));
    assert!(leaf_flags_are_correct(&storage));
    assert!(all_subspaces_complete(&storage));
}

#[test]
fn check_shared_children_add_their_best_parent_value()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    // depends on the reporting parent only
    let fun = |_: &SparseGridData, target: &RefinementTarget| 1.0 + target.anchor() as f64;
    let functor = UserDefinedRefinement::new(&fun, 1, 0.0);
    let mut storage = SparseGridData::new(2);
    crate::generators::regular(&mut storage, 2).unwrap();
    let mut refinement = SubspaceRefinement::new(HashRefinement);
    refinement.rebuild(&storage, &functor, &|_| true);
    let parents = [GridPoint::new(&[1, 2], &[1, 1], true), GridPoint::new(&[2, 1], &[1, 1], true)];
    let best = parents.iter().filter_map(|p| storage.find(p)).max().unwrap();
    let child = GridPoint::new(&[2, 2], &[1, 1], true);
    assert_eq!(refinement.counted.get(&child).copied(), Some(1.0 + best as f64));
    for _ in 0..3
    {
        refinement.free_refine(&mut storage, &functor).unwrap();
        let mut fresh = SubspaceRefinement::new(HashRefinement);
        fresh.rebuild(&storage, &functor, &|_| true);
        assert!(same_errors(refinement.error_storage(), fresh.error_storage()));
    }
}

#[test]
fn check_outside_change_triggers_rebuild()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let fun = |storage: &SparseGridData, target: &RefinementTarget| 10.0 - target.coordinates(storage).0.iter().map(|&l| l as f64).sum::<f64>();
    let functor = UserDefinedRefinement::new(&fun, 1, 0.0);
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let mut refinement = SubspaceRefinement::new(HashRefinement);
    refinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(storage.len(), 3);
    // a point level round leaves subspace (2,1) half filled
    HashRefinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(storage.len(), 4);
    refinement.free_refine(&mut storage, &functor).unwrap();
    let mut fresh = SubspaceRefinement::new(HashRefinement);
    fresh.rebuild(&storage, &functor, &|_| true);
    assert!(same_errors(refinement.error_storage(), fresh.error_storage()));
    assert!(all_subspaces_complete(&storage));
}

#[test]
fn check_subspace_budget_threshold_and_limits()
{
    use super::{functor::RefinementTarget, level_limited::LevelLimitedRefinement, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    assert_eq!(SubspaceRefinement::new(HashRefinement).free_refine(&mut storage, &UserDefinedRefinement::new(&|_: &SparseGridData, _: &RefinementTarget| 1.0, 1, 0.0)), Err(SGError::StorageEmpty));
    storage.insert_point(GridPoint::root(2)).unwrap();
    let fun = |storage: &SparseGridData, target: &RefinementTarget| 10.0 - target.coordinates(storage).0.iter().map(|&l| l as f64).sum::<f64>();
    // limited to level 2 per dimension the grid ends as the full grid of level 2
    let mut refinement = SubspaceRefinement::new(LevelLimitedRefinement::new(HashRefinement, Some(vec![2, 2]), None));
    let functor = UserDefinedRefinement::new(&fun, 2, 0.0);
    let added = refinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(added.len(), 4);
    refinement.free_refine(&mut storage, &functor).unwrap();
    assert_eq!(storage.len(), 9);
    assert!(refinement.free_refine(&mut storage, &functor).unwrap().is_empty());
    assert!(refinement.error_storage().is_empty());
    // nothing passes a threshold above every value
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let functor = UserDefinedRefinement::new(&fun, 5, 100.0);
    assert!(SubspaceRefinement::new(HashRefinement).free_refine(&mut storage, &functor).unwrap().is_empty());
    assert_eq!(storage.len(), 1);
}
