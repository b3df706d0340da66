use crate::{errors::SGError, storage::{GridPoint, SparseGridData}};

use super::{functor::RefinementFunctor, hash_refinement::{AbstractRefinement, CandidateFilter, RefinementCandidate}, selection::BoundedSelection};

///
/// Decorator that drops candidates whose level exceeds a per-dimension limit
/// or whose level sum exceeds a global limit. Dimensions without an entry in
/// `level_limits` are unlimited.
///
/// Every phase is forwarded to the wrapped strategy. A refinement round hands
/// the limits down as a candidate filter, so they also restrict strategies
/// that drive their own discovery, such as `SubspaceRefinement`.
///
pub struct LevelLimitedRefinement<R: AbstractRefinement>
{
    inner: R,
    pub level_limits: Option<Vec<u8>>,
    pub max_level_sum: Option<u32>,
}

fn within_limits(level_limits: Option<&[u8]>, max_level_sum: Option<u32>, point: &GridPoint) -> bool
{
    if let Some(limits) = level_limits
    {
        if point.level.iter().zip(limits).any(|(&l, &limit)| l > limit)
        {
            return false;
        }
    }
    max_level_sum.map_or(true, |max| point.level_sum() <= max)
}

impl<R: AbstractRefinement> LevelLimitedRefinement<R>
{
    pub fn new(inner: R, level_limits: Option<Vec<u8>>, max_level_sum: Option<u32>) -> Self
    {
        Self { inner, level_limits, max_level_sum }
    }

    pub fn inner(&self) -> &R
    {
        &self.inner
    }

    pub fn allows(&self, point: &GridPoint) -> bool
    {
        within_limits(self.level_limits.as_deref(), self.max_level_sum, point)
    }
}

impl<R: AbstractRefinement> AbstractRefinement for LevelLimitedRefinement<R>
{
    fn for_each_candidate_of(&self, storage: &SparseGridData, seq: usize, operation: &mut dyn FnMut(RefinementCandidate))
    {
        self.inner.for_each_candidate_of(storage, seq, &mut |candidate|
        {
            if self.allows(&candidate.point)
            {
                operation(candidate);
            }
        });
    }

    fn for_each_candidate(&self, storage: &SparseGridData, operation: &mut dyn FnMut(RefinementCandidate))
    {
        self.inner.for_each_candidate(storage, &mut |candidate|
        {
            if self.allows(&candidate.point)
            {
                operation(candidate);
            }
        });
    }

    fn create_point(&self, storage: &mut SparseGridData, point: GridPoint) -> Result<Vec<usize>, SGError>
    {
        self.inner.create_point(storage, point)
    }

    fn collect_candidates(&self, storage: &SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter) -> BoundedSelection<RefinementCandidate>
    {
        self.inner.collect_candidates(storage, functor, &|point| self.allows(point) && filter(point))
    }

    fn commit_selection(&self, storage: &mut SparseGridData, selection: Vec<(RefinementCandidate, f64)>, functor: &dyn RefinementFunctor) -> Result<Vec<usize>, SGError>
    {
        self.inner.commit_selection(storage, selection, functor)
    }

    fn free_refine_filtered(&mut self, storage: &mut SparseGridData, functor: &dyn RefinementFunctor, filter: &CandidateFilter) -> Result<Vec<usize>, SGError>
    {
        let level_limits = self.level_limits.as_deref();
        let max_level_sum = self.max_level_sum;
        self.inner.free_refine_filtered(storage, functor, &|point| within_limits(level_limits, max_level_sum, point) && filter(point))
    }
}

#[test]
fn check_level_limits_stop_refinement()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let fun = |_: &SparseGridData, _: &RefinementTarget| 1.0;
    let functor = UserDefinedRefinement::new(&fun, 100, 0.0);
    let mut refinement = LevelLimitedRefinement::new(HashRefinement, Some(vec![3, 1]), None);
    for _ in 0..5
    {
        refinement.free_refine(&mut storage, &functor).unwrap();
    }
    // a full 1D grid of level 3 along the first dimension
    assert_eq!(storage.len(), 7);
    assert!((0..storage.len()).all(|seq| storage.level(seq, 0) <= 3 && storage.level(seq, 1) == 1));
    assert_eq!(refinement.num_refinable_points(&storage), 0);
}

#[test]
fn check_level_sum_limit()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let fun = |_: &SparseGridData, _: &RefinementTarget| 1.0;
    let functor = UserDefinedRefinement::new(&fun, 1000, 0.0);
    let mut refinement = LevelLimitedRefinement::new(HashRefinement, None, Some(4));
    for _ in 0..6
    {
        refinement.free_refine(&mut storage, &functor).unwrap();
    }
    let mut regular = SparseGridData::new(2);
    crate::generators::regular(&mut regular, 3).unwrap();
    assert_eq!(storage.len(), regular.len());
    assert!((0..regular.len()).all(|seq| storage.contains(&regular.point(seq))));
}

#[test]
fn check_limits_reach_subspace_refinement_in_both_nesting_orders()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, subspace_refinement::SubspaceRefinement, user_defined::UserDefinedRefinement};
    let start = ||
    {
        let mut storage = SparseGridData::new(2);
        for (level, index) in [([1, 1], [1, 1]), ([2, 1], [1, 1]), ([2, 1], [3, 1])]
        {
            storage.insert_point(GridPoint::new(&level, &index, true)).unwrap();
        }
        storage.recalc_leaf_property();
        storage
    };
    let fun = |storage: &SparseGridData, target: &RefinementTarget| target.coordinates(storage).0[0] as f64;
    let functor = UserDefinedRefinement::new(&fun, 1, 0.0);

    // loose limits: the whole subspace (3,1) is created
    let mut storage = start();
    let mut outer = LevelLimitedRefinement::new(SubspaceRefinement::new(HashRefinement), Some(vec![5, 5]), None);
    assert_eq!(outer.free_refine(&mut storage, &functor).unwrap().len(), 4);
    assert_eq!(storage.len(), 7);

    // level 3 is out of reach in the first dimension, the admissible (1,2) follows
    let mut grids = Vec::new();
    let mut storage = start();
    let mut outer = LevelLimitedRefinement::new(SubspaceRefinement::new(HashRefinement), Some(vec![2, 5]), None);
    assert_eq!(outer.free_refine(&mut storage, &functor).unwrap().len(), 2);
    grids.push(storage);
    let mut storage = start();
    let mut inner = SubspaceRefinement::new(LevelLimitedRefinement::new(HashRefinement, Some(vec![2, 5]), None));
    assert_eq!(inner.free_refine(&mut storage, &functor).unwrap().len(), 2);
    grids.push(storage);
    for storage in grids
    {
        assert!(storage.contains(&GridPoint::new(&[1, 2], &[1, 1], true)));
        assert!(storage.contains(&GridPoint::new(&[1, 2], &[1, 3], true)));
        assert!((0..storage.len()).all(|seq| storage.level(seq, 0) <= 2));
    }
}

#[test]
fn check_limits_apply_to_collected_candidates()
{
    use super::{functor::RefinementTarget, hash_refinement::HashRefinement, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    let fun = |_: &SparseGridData, _: &RefinementTarget| 1.0;
    let functor = UserDefinedRefinement::new(&fun, 10, 0.0);
    let refinement = LevelLimitedRefinement::new(HashRefinement, Some(vec![2, 1]), None);
    let selection = refinement.collect_candidates(&storage, &functor, &|_| true).into_sorted();
    assert_eq!(selection.len(), 2);
    assert!(selection.iter().all(|(c, _)| c.point.level == vec![2, 1]));
    let selection = refinement.collect_candidates(&storage, &functor, &|p| p.index[0] == 3).into_sorted();
    assert_eq!(selection.len(), 1);
}
