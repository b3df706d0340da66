pub mod basis;
pub mod errors;
pub mod generators;
pub mod grid;
pub mod logger;
pub mod refinement;
pub mod serialization;
pub mod settings;
pub mod storage;
pub mod subspace;
