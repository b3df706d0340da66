use crate::storage::SparseGridData;

use super::functor::{CoarseningFunctor, RefinementFunctor, RefinementTarget};

///
/// A function that defines how refinement is performed.
///
/// # Arguments
/// - `storage`: Storage of sparse grid.
/// - `target`: The stored point or candidate child being scored.
///
pub type UserRefinementFunction = dyn Fn(&SparseGridData, &RefinementTarget) -> f64 + Send + Sync;

pub struct UserDefinedRefinement<'a>
{
    pub fun_eval: &'a UserRefinementFunction,
    pub refinements_num: usize,
    pub threshold: f64,
    pub start: f64,
    pub removements_num: usize,
}

impl<'a> UserDefinedRefinement<'a>
{
    pub fn new(fun_eval: &'a UserRefinementFunction, refinements_num: usize, threshold: f64) -> Self
    {
        Self { fun_eval, refinements_num, threshold, start: 0.0, removements_num: 0 }
    }
}

impl RefinementFunctor for UserDefinedRefinement<'_>
{
    fn value(&self, storage: &SparseGridData, target: &RefinementTarget) -> f64 {
        (self.fun_eval)(storage, target)
    }

    fn start(&self) -> f64 {
        self.start
    }

    fn refinement_threshold(&self) -> f64 {
        self.threshold
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }
}

impl CoarseningFunctor for UserDefinedRefinement<'_>
{
    fn value(&self, storage: &SparseGridData, seq: usize) -> f64 {
        (self.fun_eval)(storage, &RefinementTarget::Existing(seq))
    }

    fn coarsening_threshold(&self) -> f64 {
        self.threshold
    }

    fn removements_num(&self) -> usize {
        self.removements_num
    }
}
