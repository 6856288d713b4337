pub mod models;
pub mod result_cache;

pub use result_cache::{CacheError, ResultCache};
