use std::hash::{Hash, Hasher};
use bitfield_struct::bitfield;
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

use crate::{basis::base::BasisFunction, errors::SGError, subspace::Subspace};

pub type FastU64Map<V> = FxHashMap<u64, V>;

#[bitfield(u8, new=false)]
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct GridPointFlags
{
    pub is_leaf: bool,
    #[bits(7)]
    pub _empty: u8
}

impl GridPointFlags
{
    pub fn new(is_leaf: bool) -> Self
    {
        let mut r = Self::default();
        r.set_is_leaf(is_leaf);
        r
    }
}

///
/// Hash key shared by owned points and borrowed slices. Only level and index
/// take part in it, the flags never do.
///
#[inline]
pub(crate) fn point_key(level: &[u8], index: &[u32]) -> u64
{
    let hasher = &mut FxHasher::default();
    level.hash(hasher);
    index.hash(hasher);
    hasher.finish()
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct GridPoint
{
    pub level: Vec<u8>,
    pub index: Vec<u32>,
    pub(crate) flags: GridPointFlags,
}
impl Hash for GridPoint
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.index.hash(state);
    }
}
impl Default for GridPoint
{
    fn default() -> Self {
        Self { level: vec![], index: vec![], flags: GridPointFlags(0) }
    }
}
impl PartialOrd for GridPoint
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(std::cmp::Ord::cmp(self, other))
    }
}
impl Ord for GridPoint{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level.cmp(&other.level).then(self.index.cmp(&other.index))
    }
}

impl PartialEq for GridPoint
{
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.index == other.index
    }
}
impl Eq for GridPoint{}

impl GridPoint
{
    pub fn new (level: &[u8], index: &[u32], is_leaf: bool) -> Self
    {
        let flags= GridPointFlags::new(is_leaf);
        Self { level: level.to_vec(), index: index.to_vec(), flags }
    }

    ///
    /// The coarsest point of the hierarchy: level 1, index 1 in every dimension.
    ///
    pub fn root(num_inputs: usize) -> Self
    {
        Self::new(&vec![1; num_inputs], &vec![1; num_inputs], true)
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.level.len()
    }
    pub fn is_leaf(&self) -> bool
    {
        self.flags.is_leaf()
    }
    pub fn set_is_leaf(&mut self, is_leaf: bool)
    {
        self.flags.set_is_leaf(is_leaf);
    }
    pub fn level_sum(&self) -> u32
    {
        self.level.iter().map(|&l| l as u32).sum()
    }
    #[inline]
    pub fn level_max(&self) -> u8
    {
        *self.level.iter().max().unwrap_or(&0)
    }
    pub fn level_min(&self) -> u8
    {
        *self.level.iter().min().unwrap_or(&0)
    }

    ///
    /// A point is valid when every level is at least one and every index is
    /// odd and inside `(0, 2^level)`.
    ///
    pub fn is_valid(&self) -> bool
    {
        self.level.len() == self.index.len() && self.level.iter().zip(&self.index).all(|(&l, &i)|
        {
            l >= 1 && l < 32 && i % 2 == 1 && i < (1_u32 << l)
        })
    }

    ///
    /// Returns `None` if the child level does not fit into the level type.
    ///
    pub fn left_child(&self, dim: usize) -> Option<GridPoint>
    {
        let mut r = self.clone();
        r.level[dim] = self.level[dim].checked_add(1).filter(|&l| l < 32)?;
        r.index[dim] = 2*self.index[dim] - 1;
        r.set_is_leaf(true);
        Some(r)
    }
    pub fn right_child(&self, dim: usize) -> Option<GridPoint>
    {
        let mut r = self.clone();
        r.level[dim] = self.level[dim].checked_add(1).filter(|&l| l < 32)?;
        r.index[dim] = 2*self.index[dim] + 1;
        r.set_is_leaf(true);
        Some(r)
    }

    ///
    /// Hierarchical parent in direction `dim`. The root level has no parent.
    ///
    pub fn parent(&self, dim: usize) -> Option<GridPoint>
    {
        if self.level[dim] <= 1
        {
            return None;
        }
        let mut r = self.clone();
        r.index[dim] = (self.index[dim] >> 1) | 1;
        r.level[dim] -= 1;
        Some(r)
    }

    pub fn unit_coordinate(&self) -> Vec<f64>
    {
        let mut coor = vec![0.0; self.index.len()];
        #[allow(clippy::needless_range_loop)]
        for d in 0..self.index.len()
        {
            coor[d] = self.index[d] as f64 / (1_u64 << self.level[d]) as f64;
        }
        coor
    }

    ///
    /// Support of the hat function centred at this point in unit coordinates,
    /// `[(index-1)/2^level, (index+1)/2^level]` per dimension.
    ///
    pub fn support(&self) -> BoundingBox
    {
        let mut lower = vec![0.0; self.index.len()];
        let mut upper = vec![0.0; self.index.len()];
        for d in 0..self.index.len()
        {
            let width = (1_u64 << self.level[d]) as f64;
            lower[d] = (self.index[d] as f64 - 1.0) / width;
            upper[d] = (self.index[d] as f64 + 1.0) / width;
        }
        BoundingBox { lower, upper }
    }

    #[inline]
    pub fn subspace(&self) -> Subspace
    {
        Subspace::new(&self.level)
    }

    #[inline]
    pub fn key(&self) -> u64
    {
        point_key(&self.level, &self.index)
    }
}

impl From<&GridPoint> for u64
{
    fn from(val: &GridPoint) -> Self {
        val.key()
    }
}

pub struct GridPointRef<'a> {
    pub(crate) index: &'a [u32],
    pub(crate) level: &'a [u8],
    pub(crate) flags: &'a GridPointFlags
}
impl GridPointRef<'_>
{
    #[inline]
    pub fn level(&self) -> &[u8]
    {
        self.level
    }
    #[inline]
    pub fn index(&self) -> &[u32]
    {
        self.index
    }
    #[inline]
    pub fn is_leaf(&self) -> bool
    {
        self.flags.is_leaf()
    }
    pub fn level_sum(&self) -> u32
    {
        self.level.iter().map(|&l| l as u32).sum()
    }
}

impl PartialEq for GridPointRef<'_>
{
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.index == other.index
    }
}
impl Eq for GridPointRef<'_>{}

impl<'a> From<(&'a [u32], &'a [u8], &'a GridPointFlags)> for GridPointRef<'a>
{
    fn from((index, level, flags): (&'a [u32], &'a [u8], &'a GridPointFlags)) -> Self {
        Self { index, level, flags }
    }
}

impl From<GridPointRef<'_>> for GridPoint
{
    fn from(value: GridPointRef<'_>) -> Self {
        GridPoint { level: value.level.to_owned(), index: value.index.to_owned(), flags: *value.flags }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BoundingBox
{
    pub lower: Vec<f64>,
    pub upper: Vec<f64>
}

impl Default for BoundingBox
{
    #[inline]
    fn default() -> Self {
        Self { lower: vec![], upper: vec![] }
    }
}
impl BoundingBox
{
    #[inline]
    pub fn new(lower: &[f64], upper: &[f64]) -> Self
    {
        Self { lower: lower.to_vec(), upper: upper.to_vec() }
    }
    pub fn with_dim(num_inputs: usize) -> Self
    {
        Self { lower: vec![0.0; num_inputs], upper: vec![1.0; num_inputs] }
    }
    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.lower.len()
    }
    #[inline]
    pub fn width(&self, dim: usize) -> f64
    {
        self.upper[dim] - self.lower[dim]
    }
    #[inline]
    pub fn to_unit_coordinate_in_place(&self, point: &mut [f64])
    {
        for i in 0..point.len()
        {
            point[i] = (point[i] - self.lower[i])/(self.upper[i] - self.lower[i]);
        }
    }
    #[inline]
    pub fn to_real_coordinate(&self, point: &[f64]) -> Vec<f64>
    {
        let mut r = point.to_vec();
        self.to_real_coordinate_in_place(&mut r);
        r
    }
    #[inline]
    pub fn to_real_coordinate_in_place(&self, point: &mut [f64])
    {
        for i in 0..point.len()
        {
            point[i] = self.lower[i] + (self.upper[i] - self.lower[i]) * point[i];
        }
    }

    ///
    /// Maps a box given in unit coordinates of `self` onto real coordinates.
    ///
    pub fn to_real_box(&self, unit_box: &BoundingBox) -> BoundingBox
    {
        BoundingBox { lower: self.to_real_coordinate(&unit_box.lower), upper: self.to_real_coordinate(&unit_box.upper) }
    }

    #[inline]
    pub fn contains(&self, point: &[f64]) -> bool
    {
        #[allow(clippy::needless_range_loop)]
        for d in 0..point.len()
        {
            if self.lower[d] > point[d] || self.upper[d] < point[d]
            {
                return false;
            }
        }
        true
    }
}

///
/// Hash indexed grid storage. Points live in flat struct-of-arrays vectors and
/// are addressed by dense sequence numbers assigned in insertion order.
///
/// The lookup map is not serialized; it is rebuilt when the storage is read.
///
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(try_from = "StoredGridData")]
pub struct SparseGridData
{
    pub bounding_box: BoundingBox,
    pub(crate) index: Vec<u32>,
    pub(crate) level: Vec<u8>,
    pub(crate) flags: Vec<GridPointFlags>,
    pub(crate) num_inputs: usize,
    pub(crate) basis: BasisFunction,
    #[serde(skip)]
    pub(crate) map: FastU64Map<u32>,
}

#[derive(Deserialize)]
struct StoredGridData
{
    bounding_box: BoundingBox,
    index: Vec<u32>,
    level: Vec<u8>,
    flags: Vec<GridPointFlags>,
    num_inputs: usize,
    basis: BasisFunction,
}

impl TryFrom<StoredGridData> for SparseGridData
{
    type Error = SGError;

    fn try_from(value: StoredGridData) -> Result<Self, Self::Error> {
        let StoredGridData { bounding_box, index, level, flags, num_inputs, basis } = value;
        if index.len() != flags.len() * num_inputs || level.len() != index.len() || bounding_box.num_inputs() != num_inputs
        {
            return Err(SGError::DeserializationFailed);
        }
        let mut storage = Self { bounding_box, index, level, flags, num_inputs, basis, map: FastU64Map::default() };
        storage.generate_map();
        // duplicate points collapse in the map
        if !storage.map_initialized()
        {
            return Err(SGError::DeserializationFailed);
        }
        Ok(storage)
    }
}

impl SparseGridData
{
    pub fn new(num_inputs: usize) -> Self
    {
        Self { bounding_box: BoundingBox::with_dim(num_inputs), index: Vec::new(), level: Vec::new(), flags: Vec::new(), num_inputs,
            basis: BasisFunction::Linear, map: FastU64Map::default() }
    }

    pub fn with_basis(num_inputs: usize, basis: BasisFunction) -> Self
    {
        Self { basis, ..Self::new(num_inputs) }
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.num_inputs
    }

    #[inline]
    pub fn basis(&self) -> BasisFunction
    {
        self.basis
    }

    #[inline]
    pub fn set_basis(&mut self, basis: BasisFunction)
    {
        self.basis = basis;
    }

    #[inline]
    pub fn point(&self,seq: usize) -> GridPoint
    {
        self.node(seq).into()
    }

    #[inline]
    pub fn node(&self, seq: usize) -> GridPointRef<'_>
    {
        (self.indices(seq), self.levels(seq), &self.flags[seq]).into()
    }

    #[inline]
    pub fn levels(&self, seq: usize) -> &[u8]
    {
        &self.level[seq*self.num_inputs..(seq+1)*self.num_inputs]
    }

    #[inline]
    pub fn indices(&self, seq: usize) -> &[u32]
    {
        &self.index[seq*self.num_inputs..(seq+1)*self.num_inputs]
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.flags.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.flags.len()
    }

    #[inline]
    pub fn index(&self, seq: usize, dim: usize) -> u32
    {
        self.index[self.num_inputs*seq + dim]
    }

    #[inline(always)]
    pub fn level(&self, seq: usize, dim: usize) -> u8
    {
        self.level[self.num_inputs*seq + dim]
    }

    #[inline]
    pub fn is_leaf(&self, seq: usize) -> bool
    {
        self.flags[seq].is_leaf()
    }

    #[inline]
    pub fn set_is_leaf(&mut self, seq: usize, value: bool)
    {
        self.flags[seq].set_is_leaf(value);
    }

    #[inline]
    pub fn level_sum(&self, seq: usize) -> u32
    {
        self.levels(seq).iter().map(|&i| i as u32).sum()
    }

    #[inline]
    pub fn subspace(&self, seq: usize) -> Subspace
    {
        Subspace::new(self.levels(seq))
    }

    pub fn left_child(&self, seq: usize, dim: usize) -> Option<GridPoint>
    {
        self.point(seq).left_child(dim)
    }
    pub fn right_child(&self, seq: usize, dim: usize) -> Option<GridPoint>
    {
        self.point(seq).right_child(dim)
    }

    ///
    /// Looks up the sequence number of `point`. The stored coordinates are
    /// compared as well so that a hash collision never reports a wrong point.
    ///
    #[inline]
    pub fn find(&self, point: &GridPoint) -> Option<usize>
    {
        self.find_slices(&point.level, &point.index)
    }

    #[inline]
    pub(crate) fn find_slices(&self, level: &[u8], index: &[u32]) -> Option<usize>
    {
        let seq = *self.map.get(&point_key(level, index))? as usize;
        (self.levels(seq) == level && self.indices(seq) == index).then_some(seq)
    }

    #[inline]
    pub fn contains(&self, point: &GridPoint) -> bool
    {
        self.find(point).is_some()
    }

    ///
    /// Returns true if any child of `seq`, in any dimension, is stored.
    ///
    pub fn has_child(&self, seq: usize) -> bool
    {
        let point = self.point(seq);
        (0..self.num_inputs).any(|dim|
        {
            point.left_child(dim).is_some_and(|c| self.contains(&c)) ||
            point.right_child(dim).is_some_and(|c| self.contains(&c))
        })
    }

    ///
    /// Appends `point` and returns its sequence number. An already stored point
    /// is not duplicated; its sequence number is returned unchanged.
    /// Nothing is modified when an error is returned.
    ///
    pub fn insert_point(&mut self, point: GridPoint) -> Result<usize, SGError>
    {
        if point.level.len() != self.num_inputs || point.index.len() != self.num_inputs
        {
            return Err(SGError::DimensionMismatch);
        }
        if !point.is_valid()
        {
            return Err(SGError::InvalidIndex);
        }
        let key = point.key();
        if let Some(&seq) = self.map.get(&key)
        {
            let seq = seq as usize;
            // equal key but different coordinates would alias two points
            return if self.levels(seq) == point.level.as_slice() && self.indices(seq) == point.index.as_slice() { Ok(seq) } else { Err(SGError::InvalidIndex) };
        }
        let seq = self.flags.len();
        self.flags.push(point.flags);
        self.index.extend(point.index);
        self.level.extend(point.level);
        self.map.insert(key, seq as u32);
        Ok(seq)
    }

    ///
    /// Return the nodes in the grid...
    ///
    pub fn nodes(&self) -> NodeIterator<'_> {
        NodeIterator::new(self)
    }

    ///
    /// Return the real coordinates for each node...
    ///
    pub fn points(&self) -> PointIterator<'_>
    {
        PointIterator::new(self)
    }

    pub fn generate_map(&mut self)
    {
        let mut map = FastU64Map::default();
        map.reserve(self.len());
        for (i, node) in self.nodes().enumerate()
        {
            map.insert(point_key(node.level, node.index), i as u32);
        }
        self.map = map;
    }
    #[inline]
    pub fn map_initialized(&self) -> bool
    {
        self.len() == self.map.len()
    }

    ///
    /// Keep only the points in `points_to_keep` (in that order). Sequence numbers
    /// are reassigned densely. Leaf flags are recomputed afterwards.
    ///
    pub fn remove(&mut self, points_to_keep: &IndexSet<usize>) -> Result<(), SGError>
    {
        if points_to_keep.iter().any(|&i| i >= self.len())
        {
            return Err(SGError::InvalidIndex);
        }
        let mut indices = Vec::with_capacity(points_to_keep.len()*self.num_inputs);
        let mut levels = Vec::with_capacity(points_to_keep.len()*self.num_inputs);
        let mut flags =  Vec::with_capacity(points_to_keep.len());
        for &i in points_to_keep
        {
            indices.extend(self.indices(i));
            levels.extend(self.levels(i));
            flags.push(self.flags[i]);
        }
        self.index = indices;
        self.level = levels;
        self.flags = flags;
        self.generate_map();
        self.recalc_leaf_property();
        Ok(())
    }

    ///
    /// Removes the given sequence numbers and returns the old sequence numbers
    /// of the points that were kept, in their new order.
    ///
    pub fn remove_points(&mut self, points_to_remove: &[usize]) -> Result<IndexSet<usize>, SGError>
    {
        if points_to_remove.iter().any(|&i| i >= self.len())
        {
            return Err(SGError::InvalidIndex);
        }
        let removed: IndexSet<usize> = points_to_remove.iter().copied().collect();
        let kept: IndexSet<usize> = (0..self.len()).filter(|i| !removed.contains(i)).collect();
        self.remove(&kept)?;
        Ok(kept)
    }

    ///
    /// Recomputes, for every point, whether any child exists in any dimension.
    ///
    pub fn recalc_leaf_property(&mut self)
    {
        for i in 0..self.len()
        {
            let is_leaf = !self.has_child(i);
            self.flags[i].set_is_leaf(is_leaf);
        }
    }

    #[inline]
    pub fn bounding_box(&self) -> &BoundingBox
    {
        &self.bounding_box
    }
    #[inline]
    pub fn bounding_box_mut(&mut self) -> &mut BoundingBox
    {
        &mut self.bounding_box
    }

    pub fn unit_coordinate(&self, seq: usize) -> Vec<f64>
    {
        let mut coor = vec![0.0; self.num_inputs];
        #[allow(clippy::needless_range_loop)]
        for d in 0..self.num_inputs
        {
            coor[d] = self.index(seq, d) as f64 / (1_u64 << self.level(seq, d)) as f64;
        }
        coor
    }
}

pub struct NodeIterator<'a> {
    storage: &'a SparseGridData,
    current_seq: usize,
}
impl<'a> NodeIterator<'a>
{
    pub fn new( storage: &'a SparseGridData) -> Self
    {
        Self { storage, current_seq: 0 }
    }
}

impl<'a> Iterator for NodeIterator<'a> {
    type Item = GridPointRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_seq < self.storage.len() {
            self.current_seq += 1;
            Some(self.storage.node(self.current_seq - 1))
        } else {
            None
        }
    }
}

pub struct PointIterator<'a> {
    pub storage: &'a SparseGridData,
    current_seq: usize,
}
impl<'a> PointIterator<'a>
{
    pub fn new( storage: &'a SparseGridData) -> Self
    {
        Self { storage, current_seq: 0 }
    }
}

impl Iterator for PointIterator<'_> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_seq < self.storage.len() {
            let mut point = self.storage.unit_coordinate(self.current_seq);
            self.storage.bounding_box.to_real_coordinate_in_place(&mut point);
            self.current_seq += 1;
            Some(point)
        } else {
            None
        }
    }
}

#[test]
fn check_child_and_parent_arithmetic()
{
    let point = GridPoint::new(&[2, 1], &[3, 1], true);
    let left = point.left_child(0).unwrap();
    let right = point.right_child(0).unwrap();
    assert_eq!((left.level[0], left.index[0]), (3, 5));
    assert_eq!((right.level[0], right.index[0]), (3, 7));
    assert_eq!(left.parent(0).unwrap(), point);
    assert_eq!(right.parent(0).unwrap(), point);
    assert!(point.parent(1).is_none());
    let parent = point.parent(0).unwrap();
    assert_eq!((parent.level[0], parent.index[0]), (1, 1));
}

#[test]
fn check_insert_find_and_leaf_property()
{
    let mut storage = SparseGridData::new(2);
    let root = storage.insert_point(GridPoint::root(2)).unwrap();
    let child = GridPoint::new(&[2, 1], &[1, 1], true);
    let seq = storage.insert_point(child.clone()).unwrap();
    assert_eq!((root, seq), (0, 1));
    assert_eq!(storage.insert_point(child.clone()).unwrap(), 1);
    assert_eq!(storage.len(), 2);
    assert_eq!(storage.find(&child), Some(1));
    assert!(!storage.contains(&GridPoint::new(&[2, 1], &[3, 1], true)));
    assert_eq!(storage.insert_point(GridPoint::new(&[1], &[1], true)), Err(SGError::DimensionMismatch));
    assert_eq!(storage.insert_point(GridPoint::new(&[2, 1], &[2, 1], true)), Err(SGError::InvalidIndex));
    // there are no boundary levels
    assert_eq!(storage.insert_point(GridPoint::new(&[0, 1], &[1, 1], true)), Err(SGError::InvalidIndex));
    assert_eq!(storage.len(), 2);
    // the flags carry the leaf bit only
    assert_eq!(storage.flags[1], GridPointFlags::new(true));
    storage.recalc_leaf_property();
    assert!(!storage.is_leaf(0));
    assert!(storage.is_leaf(1));
}

#[test]
fn check_remove_renumbers_densely()
{
    let mut storage = SparseGridData::new(1);
    for (l, i) in [(1, 1), (2, 1), (2, 3), (3, 1)]
    {
        storage.insert_point(GridPoint::new(&[l], &[i], true)).unwrap();
    }
    let kept = storage.remove_points(&[2]).unwrap();
    assert_eq!(kept.iter().copied().collect::<Vec<_>>(), vec![0, 1, 3]);
    assert_eq!(storage.len(), 3);
    assert_eq!(storage.find(&GridPoint::new(&[3], &[1], true)), Some(2));
    assert!(!storage.contains(&GridPoint::new(&[2], &[3], true)));
    assert!(storage.is_leaf(2));
    assert!(!storage.is_leaf(1));
    assert_eq!(storage.remove_points(&[7]), Err(SGError::InvalidIndex));
}

#[test]
fn check_support_box()
{
    let point = GridPoint::new(&[2, 3], &[1, 5], true);
    let support = point.support();
    assert_eq!(support.lower, vec![0.0, 0.5]);
    assert_eq!(support.upper, vec![0.5, 0.75]);
    assert!(support.contains(&point.unit_coordinate()));
}
