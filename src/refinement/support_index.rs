use kdtree::KdTree;

use crate::{errors::SGError, storage::BoundingBox};

// Rows on the closed boundary of a support box must not be lost to rounding.
const BOX_TOLERANCE: f64 = 1e-12;

///
/// Row-major sample matrix borrowed from the caller.
///
#[derive(Clone, Copy, Debug)]
pub struct SampleMatrix<'a>
{
    data: &'a [f64],
    num_inputs: usize,
}

impl<'a> SampleMatrix<'a>
{
    pub fn new(data: &'a [f64], num_inputs: usize) -> Result<Self, SGError>
    {
        if num_inputs == 0 || data.len() % num_inputs != 0
        {
            return Err(SGError::DimensionMismatch);
        }
        Ok(Self { data, num_inputs })
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.num_inputs
    }

    #[inline]
    pub fn num_rows(&self) -> usize
    {
        self.data.len() / self.num_inputs
    }

    #[inline]
    pub fn row(&self, row: usize) -> &'a [f64]
    {
        &self.data[row*self.num_inputs..(row+1)*self.num_inputs]
    }

    #[inline]
    pub fn data(&self) -> &'a [f64]
    {
        self.data
    }
}

///
/// kd-tree over the unit coordinates of the sample rows, used to find the
/// rows inside an axis aligned box without scanning the whole dataset.
///
pub struct SupportIndex
{
    tree: KdTree<f64, usize, Vec<f64>>,
    num_rows: usize,
}

impl SupportIndex
{
    pub fn new(samples: &SampleMatrix, bounding_box: &BoundingBox) -> Result<Self, SGError>
    {
        if bounding_box.num_inputs() != samples.num_inputs()
        {
            return Err(SGError::DimensionMismatch);
        }
        let mut tree = KdTree::with_capacity(samples.num_inputs(), 64);
        for row in 0..samples.num_rows()
        {
            let mut unit = samples.row(row).to_vec();
            bounding_box.to_unit_coordinate_in_place(&mut unit);
            tree.add(unit, row).map_err(|_| SGError::KdTreeError)?;
        }
        Ok(Self { tree, num_rows: samples.num_rows() })
    }

    #[inline]
    pub fn num_rows(&self) -> usize
    {
        self.num_rows
    }

    ///
    /// Rows whose unit coordinates lie in `unit_box`, in ascending order.
    ///
    pub fn rows_within(&self, unit_box: &BoundingBox) -> Result<Vec<usize>, SGError>
    {
        if self.num_rows == 0
        {
            return Ok(Vec::new());
        }
        let num_inputs = unit_box.num_inputs();
        let mut center = vec![0.0; num_inputs];
        let mut half_width = vec![0.0; num_inputs];
        for d in 0..num_inputs
        {
            center[d] = 0.5 * (unit_box.lower[d] + unit_box.upper[d]);
            half_width[d] = 0.5 * unit_box.width(d);
        }
        // scaled Chebyshev distance: <= 1 exactly inside the box
        let distance = |a: &[f64], b: &[f64]|
        {
            let mut max = 0.0_f64;
            for d in 0..a.len()
            {
                max = max.max((a[d] - b[d]).abs() / half_width[d]);
            }
            max
        };
        let found = self.tree.within(&center, 1.0 + BOX_TOLERANCE, &distance).map_err(|_| SGError::KdTreeError)?;
        let mut rows: Vec<usize> = found.into_iter().map(|(_, &row)| row).collect();
        rows.sort_unstable();
        Ok(rows)
    }
}

#[test]
fn check_rows_within_box()
{
    let data = [0.1, 0.1, 0.4, 0.6, 0.5, 0.5, 0.9, 0.2, 0.25, 0.75];
    let samples = SampleMatrix::new(&data, 2).unwrap();
    let index = SupportIndex::new(&samples, &BoundingBox::with_dim(2)).unwrap();
    assert_eq!(index.num_rows(), 5);
    let rows = index.rows_within(&BoundingBox::new(&[0.0, 0.5], &[0.5, 1.0])).unwrap();
    assert_eq!(rows, vec![1, 2, 4]);
    let rows = index.rows_within(&BoundingBox::with_dim(2)).unwrap();
    assert_eq!(rows, vec![0, 1, 2, 3, 4]);
}

#[test]
fn check_sample_matrix_shape()
{
    let data = [0.0; 7];
    assert_eq!(SampleMatrix::new(&data, 2).err(), Some(SGError::DimensionMismatch));
    assert_eq!(SampleMatrix::new(&data, 0).err(), Some(SGError::DimensionMismatch));
    let samples = SampleMatrix::new(&data[..6], 3).unwrap();
    assert_eq!(samples.num_rows(), 2);
    assert_eq!(samples.row(1).len(), 3);
}
