use crate::{errors::SGError, storage::{GridPoint, SparseGridData}};

///
/// What a functor is asked to score: a point already in the grid, or the
/// child of a stored point that does not exist yet.
///
#[derive(Clone, Copy, Debug)]
pub enum RefinementTarget<'a>
{
    Existing(usize),
    Candidate { point: &'a GridPoint, parent: usize, dim: usize },
}

impl RefinementTarget<'_>
{
    ///
    /// Level and index vectors of the target.
    ///
    pub fn coordinates<'s>(&'s self, storage: &'s SparseGridData) -> (&'s [u8], &'s [u32])
    {
        match self
        {
            RefinementTarget::Existing(seq) => (storage.levels(*seq), storage.indices(*seq)),
            RefinementTarget::Candidate { point, .. } => (point.level.as_slice(), point.index.as_slice()),
        }
    }

    ///
    /// Sequence number of the stored point the target hangs off: the point
    /// itself, or the parent of a candidate.
    ///
    pub fn anchor(&self) -> usize
    {
        match self
        {
            RefinementTarget::Existing(seq) => *seq,
            RefinementTarget::Candidate { parent, .. } => *parent,
        }
    }
}

///
/// Indicator consumed by the refinement strategies. Larger values are more
/// urgent. A candidate is accepted when its value is above `start()` and at
/// least `refinement_threshold()`; at most `refinements_num()` candidates are
/// accepted per round.
///
pub trait RefinementFunctor : Send + Sync
{
    ///
    /// Return the refinement value of `target`.
    ///
    fn value(&self, storage: &SparseGridData, target: &RefinementTarget) -> f64;

    ///
    /// Values strictly below this floor are never refined.
    ///
    fn start(&self) -> f64
    {
        0.0
    }

    fn refinement_threshold(&self) -> f64;

    ///
    /// Per round budget.
    ///
    fn refinements_num(&self) -> usize;

    ///
    /// Structural precondition check, run once at the top of every refinement
    /// call before any candidate is scored.
    ///
    fn prepare(&self, _storage: &SparseGridData) -> Result<(), SGError>
    {
        Ok(())
    }

    ///
    /// Sum of the values of all stored points. Diagnostic only.
    ///
    fn total_value(&self, storage: &SparseGridData) -> f64
    {
        (0..storage.len()).map(|seq| self.value(storage, &RefinementTarget::Existing(seq))).sum()
    }

    #[inline]
    fn accepts(&self, value: f64) -> bool
    {
        value > self.start() && value >= self.refinement_threshold()
    }
}

///
/// Indicator for coarsening. Small values mark points that may be removed.
///
pub trait CoarseningFunctor : Send + Sync
{
    fn value(&self, storage: &SparseGridData, seq: usize) -> f64;

    ///
    /// Only points with a value strictly below this are removed.
    ///
    fn coarsening_threshold(&self) -> f64;

    ///
    /// Returns the maximum number of points that may be removed per round.
    ///
    fn removements_num(&self) -> usize;
}
