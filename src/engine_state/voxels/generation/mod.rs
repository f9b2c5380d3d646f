//! # Terrain Generation
//!
//! Deterministic procedural terrain. Every peer regenerates identical base
//! terrain from `(seed, theme, chunk coordinate)`, so only player edits ever
//! need to be stored or transmitted.
//!
//! * `noise` - seeded PRNG and coherent noise sources
//! * `theme` - static per-theme biome parameters
//! * `chunk_generator` - column fill and tree placement

pub mod chunk_generator;
pub mod noise;
pub mod theme;

pub use self::chunk_generator::generate_chunk;
pub use self::noise::{NoiseCache, NoiseGenerator};
pub use self::theme::{BiomeConfig, Theme};
