use std::io::Write;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::basis::base::BasisFunction;
use crate::errors::SGError;
use crate::generators;
use crate::refinement::coarsening::HashCoarsening;
use crate::refinement::functor::{CoarseningFunctor, RefinementFunctor};
use crate::refinement::hash_refinement::{AbstractRefinement, HashRefinement};
use crate::refinement::surplus::SurplusRefinementFunctor;
use crate::serialization::SerializationFormat;
use crate::storage::{BoundingBox, PointIterator, SparseGridData};

///
/// Grid storage together with one surplus vector (`num_outputs` values per
/// point). Refinement appends zero surpluses for new points, coarsening keeps
/// the surpluses aligned with the remaining points.
///
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SparseGrid
{
    pub(crate) storage: SparseGridData,
    pub(crate) alpha: Vec<f64>,
    pub(crate) num_outputs: usize,
}

impl SparseGrid
{
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self
    {
        Self::with_basis(num_inputs, num_outputs, BasisFunction::Linear)
    }

    pub fn with_basis(num_inputs: usize, num_outputs: usize, basis: BasisFunction) -> Self
    {
        SparseGrid { storage: SparseGridData::with_basis(num_inputs, basis), alpha: Vec::new(), num_outputs }
    }

    pub fn regular(&mut self, level: usize) -> Result<(), SGError>
    {
        generators::regular(&mut self.storage, level)?;
        self.alpha.resize(self.len() * self.num_outputs, 0.0);
        Ok(())
    }

    pub fn full(&mut self, level: usize) -> Result<(), SGError>
    {
        generators::full(&mut self.storage, level)?;
        self.alpha.resize(self.len() * self.num_outputs, 0.0);
        Ok(())
    }

    pub fn storage(&self) -> &SparseGridData
    {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SparseGridData
    {
        &mut self.storage
    }

    pub fn bounding_box(&self) -> &BoundingBox
    {
        self.storage.bounding_box()
    }

    pub fn bounding_box_mut(&mut self) -> &mut BoundingBox
    {
        self.storage.bounding_box_mut()
    }

    pub fn num_outputs(&self) -> usize
    {
        self.num_outputs
    }

    pub fn alpha(&self) -> &[f64]
    {
        &self.alpha
    }

    pub fn set_alpha(&mut self, alpha: Vec<f64>) -> Result<(), SGError>
    {
        if alpha.len() != self.len() * self.num_outputs
        {
            return Err(SGError::DimensionMismatch);
        }
        self.alpha = alpha;
        Ok(())
    }

    pub fn is_empty(&self) -> bool
    {
        self.storage.is_empty()
    }

    pub fn len(&self) -> usize
    {
        self.storage.len()
    }

    pub fn points(&self) -> PointIterator<'_>
    {
        self.storage.points()
    }

    ///
    /// Run one refinement round with any strategy and indicator. Returns the
    /// sequence numbers of the new points; their surpluses start at zero.
    ///
    pub fn refine<R: AbstractRefinement>(&mut self, refinement: &mut R, functor: &dyn RefinementFunctor) -> Result<Vec<usize>, SGError>
    {
        let added = refinement.free_refine(&mut self.storage, functor)?;
        self.alpha.resize(self.len() * self.num_outputs, 0.0);
        Ok(added)
    }

    ///
    /// Point refinement driven by the surplus magnitudes of this grid.
    ///
    pub fn refine_surplus(&mut self, refinements_num: usize, threshold: f64) -> Result<Vec<usize>, SGError>
    {
        let alpha = std::mem::take(&mut self.alpha);
        let functor = SurplusRefinementFunctor::new(&alpha, self.num_outputs, refinements_num, threshold);
        let result = HashRefinement.free_refine(&mut self.storage, &functor);
        self.alpha = alpha;
        let added = result?;
        self.alpha.resize(self.len() * self.num_outputs, 0.0);
        Ok(added)
    }

    ///
    /// Remove points with small values and keep the surpluses aligned.
    /// Returns the number of removed points.
    ///
    pub fn coarsen(&mut self, functor: &dyn CoarseningFunctor) -> Result<usize, SGError>
    {
        let kept = HashCoarsening.free_coarsen(&mut self.storage, functor)?;
        Ok(self.retain_alpha(&kept))
    }

    ///
    /// Coarsening driven by the surplus magnitudes of this grid.
    ///
    pub fn coarsen_surplus(&mut self, removements_num: usize, threshold: f64) -> Result<usize, SGError>
    {
        let alpha = std::mem::take(&mut self.alpha);
        let functor = SurplusRefinementFunctor::new(&alpha, self.num_outputs, 0, 0.0).with_coarsening(removements_num, threshold);
        let result = HashCoarsening.free_coarsen(&mut self.storage, &functor);
        self.alpha = alpha;
        let kept = result?;
        Ok(self.retain_alpha(&kept))
    }

    fn retain_alpha(&mut self, kept: &IndexSet<usize>) -> usize
    {
        let old_len = self.alpha.len() / self.num_outputs.max(1);
        if kept.len() == old_len
        {
            return 0;
        }
        let mut new_alpha = Vec::with_capacity(kept.len() * self.num_outputs);
        for &i in kept
        {
            if let Some(values) = self.alpha.get(i*self.num_outputs..(i+1)*self.num_outputs)
            {
                new_alpha.extend_from_slice(values);
            }
        }
        self.alpha = new_alpha;
        old_len - kept.len()
    }

    ///
    /// Writes the grid (storage and surpluses).
    ///
    pub fn write(&self, path: &str, format: SerializationFormat) -> Result<(), SGError>
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path).map_err(|_|SGError::FileIOError)?);
        let buffer = crate::serialization::serialize(self, format)?;
        file.write_all(&buffer).map_err(|_|SGError::WriteBufferFailed)?;
        Ok(())
    }

    pub fn read_buffer(buffer: &[u8], format: SerializationFormat) -> Result<Self, SGError>
    {
        let grid: Self = crate::serialization::deserialize(buffer, format)?;
        if grid.alpha.len() != grid.len() * grid.num_outputs
        {
            return Err(SGError::DeserializationFailed);
        }
        Ok(grid)
    }

    ///
    /// Reads the grid from a reader.
    ///
    pub fn read<Reader: std::io::Read>(mut reader: Reader, format: SerializationFormat) -> Result<Self, SGError>
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|_|SGError::ReadBufferFailed)?;
        Self::read_buffer(&bytes, format)
    }
}

#[test]
fn check_surplus_refinement_keeps_alpha_aligned()
{
    let mut grid = SparseGrid::new(2, 1);
    grid.regular(2).unwrap();
    assert_eq!(grid.alpha().len(), 5);
    grid.set_alpha(vec![1.0, 0.0, 0.0, 3.0, 0.5]).unwrap();
    assert_eq!(grid.set_alpha(vec![1.0]), Err(SGError::DimensionMismatch));
    let added = grid.refine_surplus(2, 0.1).unwrap();
    // both children of seq 3, the point with levels (2, 1), along the first dimension
    assert_eq!(added.len(), 2);
    assert_eq!(grid.alpha().len(), grid.len());
    assert_eq!(&grid.alpha()[..5], &[1.0, 0.0, 0.0, 3.0, 0.5]);
}

#[test]
fn check_surplus_coarsening_remaps_alpha()
{
    let mut grid = SparseGrid::new(1, 2);
    grid.regular(3).unwrap();
    let alpha: Vec<f64> = (0..7).flat_map(|i| [i as f64, -(i as f64)]).collect();
    grid.set_alpha(alpha).unwrap();
    // the leaves are seq 3 to 6 with surpluses 3, 4, 5, 6
    let removed = grid.coarsen_surplus(2, 10.0).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(grid.len(), 5);
    assert_eq!(grid.alpha(), &[0.0, 0.0, 1.0, -1.0, 2.0, -2.0, 5.0, -5.0, 6.0, -6.0]);
    assert_eq!(grid.coarsen_surplus(10, 0.0).unwrap(), 0);
    let mut empty = SparseGrid::new(1, 1);
    assert_eq!(empty.coarsen_surplus(1, 1.0), Err(SGError::StorageEmpty));
}

#[test]
fn check_grid_read_write()
{
    let mut grid = SparseGrid::with_basis(2, 1, BasisFunction::ModLinear);
    grid.full(2).unwrap();
    grid.set_alpha((0..grid.len()).map(|i| i as f64).collect()).unwrap();
    let path = std::env::temp_dir().join(format!("sgrefine_grid_{}.bin", std::process::id()));
    let path = path.to_string_lossy().to_string();
    grid.write(&path, SerializationFormat::BincodeLz4).unwrap();
    let file = std::fs::File::open(&path).unwrap();
    let read = SparseGrid::read(file, SerializationFormat::BincodeLz4).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(read.alpha(), grid.alpha());
    assert_eq!(read.storage().basis(), BasisFunction::ModLinear);
    assert!(read.storage().map_initialized());
    assert_eq!(read.points().collect::<Vec<_>>(), grid.points().collect::<Vec<_>>());
}
