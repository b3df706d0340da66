use crate::{errors::SGError, storage::SparseGridData};

use super::functor::{CoarseningFunctor, RefinementFunctor, RefinementTarget};

///
/// Surplus magnitude indicator: the largest `|alpha|` over all outputs of a
/// point. A candidate child inherits the value of its stored parent.
///
pub struct SurplusRefinementFunctor<'a>
{
    pub alpha: &'a [f64],
    pub num_outputs: usize,
    pub refinements_num: usize,
    pub threshold: f64,
    pub removements_num: usize,
    pub coarsening_threshold: f64,
}

impl<'a> SurplusRefinementFunctor<'a>
{
    pub fn new(alpha: &'a [f64], num_outputs: usize, refinements_num: usize, threshold: f64) -> Self
    {
        Self { alpha, num_outputs, refinements_num, threshold, removements_num: 0, coarsening_threshold: 0.0 }
    }

    pub fn with_coarsening(mut self, removements_num: usize, coarsening_threshold: f64) -> Self
    {
        self.removements_num = removements_num;
        self.coarsening_threshold = coarsening_threshold;
        self
    }

    #[inline]
    fn surplus(&self, seq: usize) -> f64
    {
        let mut max = 0.0_f64;
        if let Some(alpha_i) = self.alpha.get(seq*self.num_outputs..(seq+1)*self.num_outputs)
        {
            alpha_i.iter().for_each(|&val| max = max.max(val.abs()));
        }
        max
    }
}

impl RefinementFunctor for SurplusRefinementFunctor<'_>
{
    fn value(&self, _storage: &SparseGridData, target: &RefinementTarget) -> f64
    {
        self.surplus(target.anchor())
    }

    fn refinement_threshold(&self) -> f64 {
        self.threshold
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }

    fn prepare(&self, storage: &SparseGridData) -> Result<(), SGError>
    {
        if self.num_outputs == 0 || self.alpha.len() != storage.len() * self.num_outputs
        {
            return Err(SGError::DimensionMismatch);
        }
        Ok(())
    }
}

impl CoarseningFunctor for SurplusRefinementFunctor<'_>
{
    fn value(&self, _storage: &SparseGridData, seq: usize) -> f64 {
        self.surplus(seq)
    }

    fn coarsening_threshold(&self) -> f64 {
        self.coarsening_threshold
    }

    fn removements_num(&self) -> usize {
        self.removements_num
    }
}

#[test]
fn check_surplus_values()
{
    use crate::storage::GridPoint;
    let mut storage = SparseGridData::new(1);
    storage.insert_point(GridPoint::root(1)).unwrap();
    storage.insert_point(GridPoint::new(&[2], &[1], true)).unwrap();
    let alpha = [0.5, -2.0, 0.1, 0.05];
    let functor = SurplusRefinementFunctor::new(&alpha, 2, 1, 0.0);
    assert!(functor.prepare(&storage).is_ok());
    assert_eq!(RefinementFunctor::value(&functor, &storage, &RefinementTarget::Existing(0)), 2.0);
    let child = GridPoint::new(&[3], &[1], true);
    let target = RefinementTarget::Candidate { point: &child, parent: 1, dim: 0 };
    assert_eq!(RefinementFunctor::value(&functor, &storage, &target), 0.1);
    assert!((functor.total_value(&storage) - 2.1).abs() < 1e-14);
    let short = SurplusRefinementFunctor::new(&alpha[..2], 2, 1, 0.0);
    assert_eq!(short.prepare(&storage), Err(SGError::DimensionMismatch));
}
