use indexmap::IndexSet;
use tracing::debug;

use crate::{errors::SGError, storage::SparseGridData};

use super::{functor::CoarseningFunctor, selection::BoundedSelection};

///
/// Removes points with small indicator values. Only points without a child
/// in any dimension are removable, so the grid stays hierarchically complete;
/// the root point is never removed.
///
#[derive(Default, Clone, Copy, Debug)]
pub struct HashCoarsening;

impl HashCoarsening
{
    fn is_removable(storage: &SparseGridData, seq: usize) -> bool
    {
        let is_root = storage.levels(seq).iter().all(|&l| l == 1);
        !is_root && !storage.has_child(seq)
    }

    ///
    /// Returns the number of grid points that can be removed.
    ///
    pub fn num_removable_points(&self, storage: &SparseGridData) -> usize
    {
        (0..storage.len()).filter(|&seq| Self::is_removable(storage, seq)).count()
    }

    ///
    /// Remove up to `removements_num()` removable points whose value is below
    /// `coarsening_threshold()`, smallest values first. Returns the old sequence
    /// numbers of the kept points in their new order, for remapping per point
    /// data such as surpluses.
    ///
    pub fn free_coarsen(&self, storage: &mut SparseGridData, functor: &dyn CoarseningFunctor) -> Result<IndexSet<usize>, SGError>
    {
        if storage.is_empty()
        {
            return Err(SGError::StorageEmpty);
        }
        let mut selection = BoundedSelection::smallest(functor.removements_num(), functor.coarsening_threshold());
        for seq in 0..storage.len()
        {
            if Self::is_removable(storage, seq)
            {
                selection.offer(seq, functor.value(storage, seq));
            }
        }
        let offered = selection.offered();
        let removed: Vec<usize> = selection.into_sorted().into_iter().map(|(seq, _)| seq).collect();
        let kept = if removed.is_empty()
        {
            storage.recalc_leaf_property();
            (0..storage.len()).collect()
        }
        else
        {
            storage.remove_points(&removed)?
        };
        debug!("coarsening round: {} removable points, {} removed, grid size {}", offered, removed.len(), storage.len());
        Ok(kept)
    }
}

#[test]
fn check_coarsening_removes_smallest_leaves()
{
    use super::{hash_refinement::{is_hierarchically_complete, leaf_flags_are_correct}, surplus::SurplusRefinementFunctor};
    let mut storage = SparseGridData::new(1);
    crate::generators::regular(&mut storage, 3).unwrap();
    // level 3 leaves are the last four points
    let alpha = [5.0, 4.0, 4.0, 0.1, 0.9, -0.2, 0.05];
    assert_eq!(HashCoarsening.num_removable_points(&storage), 4);
    let functor = SurplusRefinementFunctor::new(&alpha, 1, 0, 0.0).with_coarsening(2, 0.5);
    let kept = HashCoarsening.free_coarsen(&mut storage, &functor).unwrap();
    assert_eq!(kept.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 4, 5]);
    assert_eq!(storage.len(), 5);
    assert!(is_hierarchically_complete(&storage));
    assert!(leaf_flags_are_correct(&storage));
}

#[test]
fn check_coarsening_keeps_root_and_inner_points()
{
    use super::{functor::RefinementTarget, user_defined::UserDefinedRefinement};
    let mut storage = SparseGridData::new(2);
    let fun = |_: &SparseGridData, _: &RefinementTarget| 0.0;
    let mut functor = UserDefinedRefinement::new(&fun, 0, 1.0);
    functor.removements_num = 100;
    assert_eq!(HashCoarsening.free_coarsen(&mut storage, &functor), Err(SGError::StorageEmpty));
    crate::generators::regular(&mut storage, 2).unwrap();
    // every value is zero, below the threshold
    let kept = HashCoarsening.free_coarsen(&mut storage, &functor).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(storage.len(), 1);
    let kept = HashCoarsening.free_coarsen(&mut storage, &functor).unwrap();
    assert_eq!(kept.len(), 1);
    assert!(storage.is_leaf(0));
}
