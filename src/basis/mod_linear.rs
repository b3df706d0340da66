use super::base::{Basis, BasisFunction};

///
/// Modified linear basis: constant on level one and linearly extrapolated
/// towards the boundary for the outermost functions of each level.
///
#[derive(Copy, Clone, Debug, Default)]
pub struct ModLinearBasis;

impl Basis for ModLinearBasis
{
    #[inline]
    fn eval(&self, level: u32, index: u32, x: f64) -> f64 {
        if level <= 1
        {
            return 1.0;
        }
        let scale = (1_u64 << level) as f64;
        if index == 1
        {
            0.0_f64.max(2.0 - scale * x)
        }
        else if index as u64 == (1_u64 << level) - 1
        {
            0.0_f64.max(scale * x - index as f64 + 1.0)
        }
        else
        {
            0.0_f64.max(1.0 - f64::abs(scale * x - index as f64))
        }
    }

    fn basis_type(&self) -> BasisFunction {
        BasisFunction::ModLinear
    }
}

#[test]
fn check_mod_linear()
{
    let basis = ModLinearBasis;
    assert_eq!(basis.eval(1, 1, 0.9), 1.0);
    assert_eq!(basis.eval(2, 1, 0.0), 2.0);
    assert_eq!(basis.eval(2, 1, 0.5), 0.0);
    assert_eq!(basis.eval(2, 3, 1.0), 2.0);
    assert_eq!(basis.eval(3, 3, 0.375), 1.0);
}
