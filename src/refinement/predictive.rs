use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
use rayon::{iter::{IndexedParallelIterator, ParallelIterator}, slice::ParallelSlice};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{basis::base::{basis_evaluator, Basis}, errors::SGError, settings::RefinementSettings, storage::{BoundingBox, GridPoint, SparseGridData}};

use super::{functor::{RefinementFunctor, RefinementTarget}, support_index::{SampleMatrix, SupportIndex}};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;

///
/// Which rows of the dataset are visited for one estimate.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode
{
    /// Every row.
    #[default]
    Full,
    /// Only rows inside the support of the candidate's parent.
    Online,
}

///
/// Result of one predictive estimate. `support_count` is the number of rows
/// on which the basis function does not vanish, `r22` the squared residual
/// norm over all rows of the dataset.
///
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PredictiveEstimate
{
    pub value: f64,
    pub numerator: f64,
    pub denominator: f64,
    pub r22: f64,
    pub support_count: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct PartialSums
{
    numerator: f64,
    denominator: f64,
    support_count: usize,
}

impl PartialSums
{
    #[inline]
    fn add(&mut self, phi: f64, residual: f64)
    {
        if phi != 0.0
        {
            self.numerator += phi * residual;
            self.denominator += phi * phi;
            self.support_count += 1;
        }
    }

    #[inline]
    fn merge(self, other: Self) -> Self
    {
        Self {
            numerator: self.numerator + other.numerator,
            denominator: self.denominator + other.denominator,
            support_count: self.support_count + other.support_count,
        }
    }
}

///
/// Predicts how much the squared residual error on a dataset would drop if a
/// basis function were added, without adding it. With
/// `a = sum(phi*r) / sum(phi^2)` the estimate is
/// `a * (2*sum(phi*r) - a*sum(phi^2))`.
///
/// The dataset rows are given in real coordinates of `bounding_box`. Neither
/// the samples nor the residuals are copied or modified.
///
pub struct PredictiveRefinementIndicator<'a>
{
    samples: Option<SampleMatrix<'a>>,
    residuals: Option<&'a [f64]>,
    r22: f64,
    basis: Option<Arc<dyn Basis>>,
    bounding_box: BoundingBox,
    support_index: Option<SupportIndex>,
    refinements_num: usize,
    threshold: f64,
    min_support_points: usize,
    scan_mode: ScanMode,
    block_size: usize,
    warned_basis: AtomicBool,
}

impl<'a> PredictiveRefinementIndicator<'a>
{
    ///
    /// The basis is resolved from the grid's basis family. If there is no
    /// built-in evaluator every estimate is zero until one is set with
    /// `set_basis`.
    ///
    pub fn new(storage: &SparseGridData, refinements_num: usize, threshold: f64) -> Self
    {
        let basis = match basis_evaluator(storage.basis())
        {
            Ok(basis) => Some(basis),
            Err(err) =>
            {
                warn!("no basis evaluator for {:?} ({}), predictive indicator values default to zero", storage.basis(), err);
                None
            }
        };
        Self {
            samples: None,
            residuals: None,
            r22: 0.0,
            basis,
            bounding_box: storage.bounding_box().clone(),
            support_index: None,
            refinements_num,
            threshold,
            min_support_points: 0,
            scan_mode: ScanMode::Full,
            block_size: DEFAULT_BLOCK_SIZE,
            warned_basis: AtomicBool::new(false),
        }
    }

    pub fn from_settings(storage: &SparseGridData, settings: &RefinementSettings) -> Self
    {
        let mut indicator = Self::new(storage, settings.refinements_num, settings.threshold);
        indicator.min_support_points = settings.min_support_points;
        indicator.scan_mode = settings.scan_mode;
        indicator.block_size = settings.block_size.max(1);
        indicator
    }

    ///
    /// Set the sample matrix (row-major, `num_inputs` columns). In online mode
    /// this also builds the support index.
    ///
    pub fn set_dataset(&mut self, samples: &'a [f64], num_inputs: usize) -> Result<(), SGError>
    {
        let samples = SampleMatrix::new(samples, num_inputs)?;
        if num_inputs != self.bounding_box.num_inputs()
        {
            return Err(SGError::DimensionMismatch);
        }
        self.support_index = match self.scan_mode
        {
            ScanMode::Online => Some(SupportIndex::new(&samples, &self.bounding_box)?),
            ScanMode::Full => None,
        };
        self.samples = Some(samples);
        Ok(())
    }

    pub fn set_residuals(&mut self, residuals: &'a [f64])
    {
        self.residuals = Some(residuals);
        self.r22 = residuals.iter().map(|r| r * r).sum();
    }

    pub fn set_scan_mode(&mut self, scan_mode: ScanMode) -> Result<(), SGError>
    {
        self.scan_mode = scan_mode;
        self.support_index = match (scan_mode, self.samples.as_ref())
        {
            (ScanMode::Online, Some(samples)) => Some(SupportIndex::new(samples, &self.bounding_box)?),
            _ => None,
        };
        Ok(())
    }

    pub fn scan_mode(&self) -> ScanMode
    {
        self.scan_mode
    }

    pub fn set_basis(&mut self, basis: Arc<dyn Basis>)
    {
        self.basis = Some(basis);
    }

    pub fn set_min_support_points(&mut self, min_support_points: usize)
    {
        self.min_support_points = min_support_points;
    }

    pub fn set_block_size(&mut self, block_size: usize)
    {
        self.block_size = block_size.max(1);
    }

    pub fn set_refinements_num(&mut self, refinements_num: usize)
    {
        self.refinements_num = refinements_num;
    }

    pub fn set_threshold(&mut self, threshold: f64)
    {
        self.threshold = threshold;
    }

    ///
    /// One dimensional basis value. Zero when no evaluator is available.
    ///
    #[inline]
    pub fn basis_function_eval_helper(&self, level: u32, index: u32, x: f64) -> f64
    {
        match self.basis.as_ref()
        {
            Some(basis) => basis.eval(level, index, x),
            None =>
            {
                if !self.warned_basis.swap(true, Ordering::Relaxed)
                {
                    warn!("predictive indicator has no basis evaluator, all estimates are zero");
                }
                0.0
            }
        }
    }

    ///
    /// Tensor product basis value at a sample row given in real coordinates,
    /// each factor clamped at zero. Stops at the first vanishing factor.
    ///
    #[inline]
    fn phi(&self, level: &[u8], index: &[u32], row: &[f64]) -> f64
    {
        let mut value = 1.0;
        for d in 0..level.len()
        {
            let x = (row[d] - self.bounding_box.lower[d]) / self.bounding_box.width(d);
            let factor = self.basis_function_eval_helper(level[d] as u32, index[d], x).max(0.0);
            if factor == 0.0
            {
                return 0.0;
            }
            value *= factor;
        }
        value
    }

    fn inputs(&self) -> Result<(SampleMatrix<'a>, &'a [f64]), SGError>
    {
        let (Some(samples), Some(residuals)) = (self.samples, self.residuals) else
        {
            return Err(SGError::MissingInputs);
        };
        if residuals.len() != samples.num_rows()
        {
            return Err(SGError::DimensionMismatch);
        }
        Ok((samples, residuals))
    }

    ///
    /// Fixed size blocks are reduced in parallel and their partial sums added
    /// in block order, so the result does not depend on the thread count.
    ///
    fn scan_all(&self, samples: &SampleMatrix, residuals: &[f64], level: &[u8], index: &[u32]) -> PartialSums
    {
        let num_inputs = samples.num_inputs();
        let partials: Vec<PartialSums> = samples.data().par_chunks(self.block_size * num_inputs).zip(residuals.par_chunks(self.block_size)).map(|(rows, res)|
        {
            let mut sums = PartialSums::default();
            for (row, &r) in rows.chunks_exact(num_inputs).zip(res)
            {
                sums.add(self.phi(level, index, row), r);
            }
            sums
        }).collect();
        partials.into_iter().fold(PartialSums::default(), PartialSums::merge)
    }

    fn scan_rows(&self, samples: &SampleMatrix, residuals: &[f64], rows: &[usize], level: &[u8], index: &[u32]) -> PartialSums
    {
        let partials: Vec<PartialSums> = rows.par_chunks(self.block_size).map(|block|
        {
            let mut sums = PartialSums::default();
            for &row in block
            {
                sums.add(self.phi(level, index, samples.row(row)), residuals[row]);
            }
            sums
        }).collect();
        partials.into_iter().fold(PartialSums::default(), PartialSums::merge)
    }

    ///
    /// Estimate for the point with the given level and index vectors. In online
    /// mode only the rows inside `scan_box` (unit coordinates) are visited.
    ///
    pub fn estimate_point(&self, level: &[u8], index: &[u32], scan_box: &BoundingBox) -> Result<PredictiveEstimate, SGError>
    {
        let (samples, residuals) = self.inputs()?;
        if level.len() != samples.num_inputs() || index.len() != samples.num_inputs()
        {
            return Err(SGError::DimensionMismatch);
        }
        let sums = match (self.scan_mode, self.support_index.as_ref())
        {
            (ScanMode::Online, Some(support_index)) =>
            {
                let rows = support_index.rows_within(scan_box)?;
                self.scan_rows(&samples, residuals, &rows, level, index)
            },
            _ => self.scan_all(&samples, residuals, level, index),
        };
        let mut estimate = PredictiveEstimate {
            value: 0.0,
            numerator: sums.numerator,
            denominator: sums.denominator,
            r22: self.r22,
            support_count: sums.support_count,
        };
        if sums.denominator == 0.0 || sums.support_count < self.min_support_points
        {
            return Ok(estimate);
        }
        let a = sums.numerator / sums.denominator;
        estimate.value = a * (2.0 * sums.numerator - a * sums.denominator);
        Ok(estimate)
    }

    ///
    /// Estimate for a stored point or a candidate child. The online scan box is
    /// the support of the candidate's parent, or of the stored point itself.
    ///
    pub fn estimate(&self, storage: &SparseGridData, target: &RefinementTarget) -> Result<PredictiveEstimate, SGError>
    {
        let (level, index) = target.coordinates(storage);
        let scan_box = GridPoint::from(storage.node(target.anchor())).support();
        self.estimate_point(level, index, &scan_box)
    }
}

impl RefinementFunctor for PredictiveRefinementIndicator<'_>
{
    fn value(&self, storage: &SparseGridData, target: &RefinementTarget) -> f64
    {
        match self.estimate(storage, target)
        {
            Ok(estimate) => estimate.value,
            Err(err) =>
            {
                warn!("predictive estimate failed: {}", err);
                0.0
            }
        }
    }

    fn refinement_threshold(&self) -> f64
    {
        self.threshold
    }

    fn refinements_num(&self) -> usize
    {
        self.refinements_num
    }

    fn prepare(&self, storage: &SparseGridData) -> Result<(), SGError>
    {
        let (samples, _) = self.inputs()?;
        if samples.num_inputs() != storage.num_inputs()
        {
            return Err(SGError::DimensionMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
fn root_grid_2d() -> SparseGridData
{
    let mut storage = SparseGridData::new(2);
    storage.insert_point(GridPoint::root(2)).unwrap();
    storage
}

#[cfg(test)]
const SCENARIO_SAMPLES: [f64; 10] = [0.2, 0.5, 0.225, 0.5, 0.25, 0.5, 0.275, 0.5, 0.3, 0.5];

#[test]
fn check_scenario_child_is_created()
{
    use super::hash_refinement::{AbstractRefinement, HashRefinement};
    let mut storage = root_grid_2d();
    let residuals = [1.0; 5];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    indicator.set_dataset(&SCENARIO_SAMPLES, 2).unwrap();
    indicator.set_residuals(&residuals);
    let added = HashRefinement.free_refine(&mut storage, &indicator).unwrap();
    assert_eq!(added.len(), 1);
    let child = GridPoint::new(&[2, 1], &[1, 1], true);
    assert_eq!(storage.find(&child), Some(added[0]));
    assert!(!storage.is_leaf(0));
    assert!(storage.is_leaf(added[0]));
}

#[test]
fn check_scenario_min_support_blocks_refinement()
{
    use super::hash_refinement::{AbstractRefinement, HashRefinement};
    let mut storage = root_grid_2d();
    let residuals = [1.0; 5];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    indicator.set_min_support_points(10);
    indicator.set_dataset(&SCENARIO_SAMPLES, 2).unwrap();
    indicator.set_residuals(&residuals);
    let child = GridPoint::new(&[2, 1], &[1, 1], true);
    let target = RefinementTarget::Candidate { point: &child, parent: 0, dim: 0 };
    let estimate = indicator.estimate(&storage, &target).unwrap();
    assert_eq!(estimate.support_count, 5);
    assert_eq!(estimate.value, 0.0);
    assert!(HashRefinement.free_refine(&mut storage, &indicator).unwrap().is_empty());
    assert_eq!(storage.len(), 1);
}

#[test]
fn check_estimate_matches_closed_form()
{
    let storage = root_grid_2d();
    let samples = [0.25, 0.5, 0.125, 0.5, 0.375, 0.25, 0.9, 0.9];
    let residuals = [2.0, 1.0, -1.0, 5.0];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    indicator.set_dataset(&samples, 2).unwrap();
    indicator.set_residuals(&residuals);
    let child = GridPoint::new(&[2, 1], &[1, 1], true);
    let target = RefinementTarget::Candidate { point: &child, parent: 0, dim: 0 };
    let estimate = indicator.estimate(&storage, &target).unwrap();
    // phi = 1, 0.5, 0.25 (0.5 * 0.5); the last row is off the support but counts in r22
    let numerator = 2.0 + 0.5 - 0.25;
    let denominator = 1.0 + 0.25 + 0.0625;
    assert_eq!(estimate.support_count, 3);
    assert!((estimate.numerator - numerator).abs() < 1e-14);
    assert!((estimate.denominator - denominator).abs() < 1e-14);
    assert!((estimate.r22 - 31.0).abs() < 1e-14);
    assert!((estimate.value - numerator * numerator / denominator).abs() < 1e-12);
}

#[test]
fn check_degenerate_indicator_is_zero()
{
    let storage = root_grid_2d();
    let samples = [0.9, 0.9, 0.8, 0.95];
    let residuals = [3.0, 4.0];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    indicator.set_dataset(&samples, 2).unwrap();
    indicator.set_residuals(&residuals);
    let child = GridPoint::new(&[2, 1], &[1, 1], true);
    let target = RefinementTarget::Candidate { point: &child, parent: 0, dim: 0 };
    let estimate = indicator.estimate(&storage, &target).unwrap();
    assert_eq!(estimate.support_count, 0);
    assert_eq!(estimate.value, 0.0);
}

#[test]
fn check_missing_inputs()
{
    use super::hash_refinement::{AbstractRefinement, HashRefinement};
    let mut storage = root_grid_2d();
    let samples = [0.5, 0.5];
    let residuals = [1.0, 2.0];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    assert_eq!(HashRefinement.free_refine(&mut storage, &indicator), Err(SGError::MissingInputs));
    indicator.set_dataset(&samples, 2).unwrap();
    assert_eq!(indicator.prepare(&storage), Err(SGError::MissingInputs));
    indicator.set_residuals(&residuals);
    assert_eq!(indicator.prepare(&storage), Err(SGError::DimensionMismatch));
    assert_eq!(storage.len(), 1);
}

#[test]
fn check_unsupported_basis_degrades_to_zero()
{
    use crate::basis::{base::BasisFunction, linear::LinearBasis};
    let mut storage = root_grid_2d();
    storage.set_basis(BasisFunction::CustomBasis);
    let residuals = [1.0; 5];
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
    indicator.set_dataset(&SCENARIO_SAMPLES, 2).unwrap();
    indicator.set_residuals(&residuals);
    assert_eq!(indicator.basis_function_eval_helper(1, 1, 0.5), 0.0);
    assert_eq!(indicator.total_value(&storage), 0.0);
    indicator.set_basis(Arc::new(LinearBasis));
    assert!(indicator.total_value(&storage) > 0.0);
}

#[test]
fn check_online_scan_matches_full_scan()
{
    use crate::basis::base::BasisFunction;
    use super::hash_refinement::{AbstractRefinement, HashRefinement};
    for basis in [BasisFunction::Linear, BasisFunction::ModLinear]
    {
        let mut storage = SparseGridData::with_basis(2, basis);
        crate::generators::regular(&mut storage, 3).unwrap();
        // deterministic scatter, including rows on the domain boundary
        let mut samples = Vec::new();
        let mut residuals = Vec::new();
        for i in 0..400
        {
            let x = ((i * 37) % 101) as f64 / 100.0;
            let y = ((i * 53) % 97) as f64 / 96.0;
            samples.extend([x, y]);
            residuals.push((7.0 * x).sin() - y * y);
        }
        let mut full = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
        full.set_block_size(64);
        full.set_dataset(&samples, 2).unwrap();
        full.set_residuals(&residuals);
        let mut online = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
        online.set_scan_mode(ScanMode::Online).unwrap();
        online.set_block_size(7);
        online.set_dataset(&samples, 2).unwrap();
        online.set_residuals(&residuals);
        HashRefinement.for_each_candidate(&storage, &mut |candidate|
        {
            let a = full.estimate(&storage, &candidate.target()).unwrap();
            let b = online.estimate(&storage, &candidate.target()).unwrap();
            assert_eq!(a.support_count, b.support_count);
            assert!((a.value - b.value).abs() <= 1e-10 * (1.0 + a.value.abs()));
        });
    }
}

#[test]
fn check_block_size_does_not_change_result()
{
    let storage = root_grid_2d();
    let mut samples = Vec::new();
    let mut residuals = Vec::new();
    for i in 0..1000
    {
        samples.extend([(i as f64 * 0.618).fract(), (i as f64 * 0.414).fract()]);
        residuals.push((i % 13) as f64 - 6.0);
    }
    let child = GridPoint::new(&[1, 2], &[1, 3], true);
    let target = RefinementTarget::Candidate { point: &child, parent: 0, dim: 1 };
    let mut values = Vec::new();
    for block_size in [1000, 128]
    {
        let mut indicator = PredictiveRefinementIndicator::new(&storage, 1, 0.0);
        indicator.set_block_size(block_size);
        indicator.set_dataset(&samples, 2).unwrap();
        indicator.set_residuals(&residuals);
        let first = indicator.estimate(&storage, &target).unwrap();
        let second = indicator.estimate(&storage, &target).unwrap();
        assert_eq!(first, second);
        values.push(first.value);
    }
    assert!((values[0] - values[1]).abs() <= 1e-9 * (1.0 + values[0].abs()));
}
