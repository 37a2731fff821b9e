pub mod bounce;
pub mod journey;
pub mod patterns;
