//! Application layer: the render pipeline, cache warming and the traits
//! adapters implement.

pub mod error;
pub mod render;
pub mod sources;
pub mod warmer;
