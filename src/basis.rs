pub mod base;
pub mod linear;
pub mod mod_linear;
