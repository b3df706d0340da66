use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::errors::SGError;

///
/// One dimensional hierarchical basis oracle. Implementations must be pure.
///
pub trait Basis : Send + Sync
{
    fn eval(&self, level: u32, index: u32, x: f64) -> f64;
    fn basis_type(&self) -> BasisFunction;
}


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BasisFunction
{
    #[default]
    Linear = 0,
    ModLinear = 1,
    /// Basis supplied by the caller. There is no built-in evaluator for it.
    CustomBasis = 2,
}

///
/// Resolve the built-in evaluator for a grid's basis family.
///
pub fn basis_evaluator(basis: BasisFunction) -> Result<Arc<dyn Basis>, SGError>
{
    match basis
    {
        BasisFunction::Linear => Ok(Arc::new(super::linear::LinearBasis)),
        BasisFunction::ModLinear => Ok(Arc::new(super::mod_linear::ModLinearBasis)),
        BasisFunction::CustomBasis => Err(SGError::UnsupportedBasisType),
    }
}

#[test]
fn check_resolver()
{
    assert_eq!(basis_evaluator(BasisFunction::Linear).unwrap().basis_type(), BasisFunction::Linear);
    assert_eq!(basis_evaluator(BasisFunction::ModLinear).unwrap().basis_type(), BasisFunction::ModLinear);
    assert!(matches!(basis_evaluator(BasisFunction::CustomBasis), Err(SGError::UnsupportedBasisType)));
}
