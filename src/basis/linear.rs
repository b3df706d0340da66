use super::base::{Basis, BasisFunction};

///
/// Piecewise linear hat functions `max(0, 1 - |2^l x - i|)`.
///
#[derive(Copy, Clone, Debug, Default)]
pub struct LinearBasis;

impl Basis for LinearBasis
{
    #[inline]
    fn eval(&self, level: u32, index: u32, x: f64) -> f64 {
        0.0_f64.max(1.0-f64::abs((1_u64 << level) as f64 * x - index as f64 ))
    }

    fn basis_type(&self) -> BasisFunction {
        BasisFunction::Linear
    }
}

#[test]
fn check_linear_hat()
{
    let basis = LinearBasis;
    assert_eq!(basis.eval(1, 1, 0.5), 1.0);
    assert_eq!(basis.eval(1, 1, 0.0), 0.0);
    assert!((basis.eval(2, 1, 0.125) - 0.5).abs() < 1e-14);
    assert_eq!(basis.eval(2, 3, 0.25), 0.0);
}
