use serde::{Deserialize, Serialize};

use crate::storage::GridPoint;

///
/// All grid points sharing one level vector. The index is normalized away, so
/// a subspace is identified by its levels alone.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subspace
{
    pub level: Vec<u8>,
}

impl Subspace
{
    pub fn new(level: &[u8]) -> Self
    {
        Self { level: level.to_vec() }
    }

    pub fn root(num_inputs: usize) -> Self
    {
        Self { level: vec![1; num_inputs] }
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.level.len()
    }

    pub fn level_sum(&self) -> u32
    {
        self.level.iter().map(|&l| l as u32).sum()
    }

    ///
    /// Number of points in the subspace, `prod_d 2^(l_d - 1)`.
    ///
    pub fn num_points(&self) -> u64
    {
        self.level.iter().fold(1_u64, |acc, &l| acc.saturating_mul(1_u64 << (l.max(1) - 1)))
    }

    ///
    /// The subspace one level coarser in `dim`, `None` at level one.
    ///
    pub fn coarser(&self, dim: usize) -> Option<Subspace>
    {
        if self.level[dim] <= 1
        {
            return None;
        }
        let mut r = self.clone();
        r.level[dim] -= 1;
        Some(r)
    }

    pub fn finer(&self, dim: usize) -> Option<Subspace>
    {
        let mut r = self.clone();
        r.level[dim] = self.level[dim].checked_add(1).filter(|&l| l < 32)?;
        Some(r)
    }

    ///
    /// Iterates all grid points of the subspace, first dimension fastest.
    ///
    pub fn points(&self) -> SubspacePointIterator
    {
        SubspacePointIterator::new(self)
    }
}

pub struct SubspacePointIterator
{
    level: Vec<u8>,
    current: Option<Vec<u32>>,
}

impl SubspacePointIterator
{
    fn new(subspace: &Subspace) -> Self
    {
        let valid = subspace.level.iter().all(|&l| (1..32).contains(&l));
        Self { level: subspace.level.clone(), current: valid.then(|| vec![1; subspace.level.len()]) }
    }
}

impl Iterator for SubspacePointIterator
{
    type Item = GridPoint;

    fn next(&mut self) -> Option<Self::Item>
    {
        let index = self.current.as_mut()?;
        let point = GridPoint::new(&self.level, index, true);
        // odometer over odd indices
        let mut advanced = false;
        for d in 0..index.len()
        {
            if index[d] + 2 < (1_u32 << self.level[d])
            {
                index[d] += 2;
                advanced = true;
                break;
            }
            index[d] = 1;
        }
        if !advanced
        {
            self.current = None;
        }
        Some(point)
    }
}

#[test]
fn check_subspace_points()
{
    let subspace = Subspace::new(&[2, 3]);
    assert_eq!(subspace.num_points(), 8);
    let points: Vec<_> = subspace.points().collect();
    assert_eq!(points.len(), 8);
    assert!(points.iter().all(|p| p.level == vec![2, 3] && p.is_valid()));
    assert_eq!(points[0].index, vec![1, 1]);
    assert_eq!(points[1].index, vec![3, 1]);
    assert_eq!(points[7].index, vec![3, 7]);
    assert_eq!(Subspace::root(3).points().count(), 1);
}

#[test]
fn check_subspace_neighbours()
{
    let subspace = Subspace::new(&[1, 2]);
    assert!(subspace.coarser(0).is_none());
    assert_eq!(subspace.coarser(1), Some(Subspace::new(&[1, 1])));
    assert_eq!(subspace.finer(0), Some(Subspace::new(&[2, 2])));
}
