//! Rendering: the cell compiler and its backing cache.

mod cache;
mod compiler;

pub use cache::{CacheKey, CacheStats, CellCache, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use compiler::{cache_key, CellCompiler, TextSubstituter};
