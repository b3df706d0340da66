use crate::{errors::SGError, storage::{GridPoint, SparseGridData}};

///
/// Extend `points` along `dim`: every point is repeated once for each odd
/// index of each level accepted by `accept(point, level)`.
///
fn sweep_dimension<F: Fn(&GridPoint, u8) -> bool>(points: Vec<GridPoint>, dim: usize, max_level: u8, accept: F) -> Vec<GridPoint>
{
    let mut result = Vec::with_capacity(points.len() * 2);
    for mut point in points
    {
        let mut l = 1;
        while l <= max_level && accept(&point, l)
        {
            for i in (1..(1_u32 << l)).step_by(2)
            {
                point.level[dim] = l;
                point.index[dim] = i;
                result.push(point.clone());
            }
            l += 1;
        }
    }
    result
}

fn insert_all(storage: &mut SparseGridData, points: Vec<GridPoint>) -> Result<(), SGError>
{
    for point in points
    {
        storage.insert_point(point)?;
    }
    storage.recalc_leaf_property();
    Ok(())
}

fn check_level(level: usize) -> Result<u8, SGError>
{
    if level == 0 || level >= 32
    {
        return Err(SGError::InvalidIndex);
    }
    Ok(level as u8)
}

///
/// Generates a regular sparse grid of level `level` without boundary points:
/// every level vector with `|l|_1 <= level + D - 1`.
///
pub fn regular(storage: &mut SparseGridData, level: usize) -> Result<(), SGError>
{
    let n = check_level(level)?;
    let num_inputs = storage.num_inputs();
    if num_inputs == 0
    {
        return Err(SGError::DimensionMismatch);
    }
    let bound = n as u32 + num_inputs as u32 - 1;
    let mut points = vec![GridPoint::root(num_inputs)];
    // levels of dimensions not swept yet count as one
    for d in 0..num_inputs
    {
        let remaining = (num_inputs - d - 1) as u32;
        points = sweep_dimension(points, d, n, |point, l|
        {
            let swept: u32 = point.level[..d].iter().map(|&v| v as u32).sum();
            swept + l as u32 + remaining <= bound
        });
    }
    insert_all(storage, points)
}

///
/// Generates a full grid with all levels up to `level` in every dimension.
///
pub fn full(storage: &mut SparseGridData, level: usize) -> Result<(), SGError>
{
    let n = check_level(level)?;
    let num_inputs = storage.num_inputs();
    if num_inputs == 0
    {
        return Err(SGError::DimensionMismatch);
    }
    let mut points = vec![GridPoint::root(num_inputs)];
    for d in 0..num_inputs
    {
        points = sweep_dimension(points, d, n, |_, _| true);
    }
    insert_all(storage, points)
}

#[test]
fn check_regular_grid_sizes()
{
    // |l|_1 <= 4 in 2D: 1 + 2 + 2 + 4 + 4 + 4 points
    let mut storage = SparseGridData::new(2);
    regular(&mut storage, 3).unwrap();
    assert_eq!(storage.len(), 17);
    let mut storage = SparseGridData::new(1);
    regular(&mut storage, 4).unwrap();
    assert_eq!(storage.len(), 15);
    let mut storage = SparseGridData::new(3);
    regular(&mut storage, 1).unwrap();
    assert_eq!(storage.len(), 1);
    assert!(storage.is_leaf(0));
}

#[test]
fn check_full_grid_size()
{
    let mut storage = SparseGridData::new(2);
    full(&mut storage, 3).unwrap();
    assert_eq!(storage.len(), 49);
    let leaves = (0..storage.len()).filter(|&i| storage.is_leaf(i)).count();
    assert_eq!(leaves, 16);
}
