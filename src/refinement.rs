pub mod coarsening;
pub mod error_storage;
pub mod functor;
pub mod hash_refinement;
pub mod level_limited;
pub mod predictive;
pub mod selection;
pub mod subspace_refinement;
pub mod support_index;
pub mod surplus;
pub mod user_defined;
