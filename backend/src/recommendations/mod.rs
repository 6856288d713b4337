pub mod requester;

pub use requester::{RecommendationError, RecommendationRequester};
