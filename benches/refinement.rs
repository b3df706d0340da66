use criterion::{criterion_group, criterion_main, Criterion};
use sgrefine::{errors::SGError, generators, refinement::{hash_refinement::{AbstractRefinement, HashRefinement}, predictive::{PredictiveRefinementIndicator, ScanMode}, subspace_refinement::SubspaceRefinement}, storage::SparseGridData};

fn build_dataset(rows: usize) -> (Vec<f64>, Vec<f64>)
{
    // quasi random points in the unit square, residual of a peak at (0.3, 0.7)
    let mut samples = Vec::with_capacity(rows * 2);
    let mut residuals = Vec::with_capacity(rows);
    for i in 0..rows
    {
        let x = (i as f64 * 0.754_877_666).fract();
        let y = (i as f64 * 0.569_840_291).fract();
        samples.extend([x, y]);
        residuals.push((-40.0 * ((x - 0.3).powi(2) + (y - 0.7).powi(2))).exp());
    }
    (samples, residuals)
}

fn refine_rounds<R: AbstractRefinement>(refinement: &mut R, scan_mode: ScanMode, samples: &[f64], residuals: &[f64]) -> Result<usize, SGError>
{
    let mut storage = SparseGridData::new(2);
    generators::regular(&mut storage, 3)?;
    let mut indicator = PredictiveRefinementIndicator::new(&storage, 8, 1e-6);
    indicator.set_scan_mode(scan_mode)?;
    indicator.set_dataset(samples, 2)?;
    indicator.set_residuals(residuals);
    for _ in 0..5
    {
        refinement.free_refine(&mut storage, &indicator)?;
    }
    Ok(storage.len())
}

fn run_predictive(c: &mut Criterion)
{
    let (samples, residuals) = build_dataset(20_000);
    c.bench_function("predictive full scan", |b| b.iter(|| refine_rounds(&mut HashRefinement, ScanMode::Full, &samples, &residuals).unwrap()));
    c.bench_function("predictive online scan", |b| b.iter(|| refine_rounds(&mut HashRefinement, ScanMode::Online, &samples, &residuals).unwrap()));
    c.bench_function("predictive subspaces", |b| b.iter(|| refine_rounds(&mut SubspaceRefinement::new(HashRefinement), ScanMode::Online, &samples, &residuals).unwrap()));
}

criterion_group!(benches, run_predictive);
criterion_main!(benches);
