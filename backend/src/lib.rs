pub mod cache;
pub mod config;
pub mod imaging;
pub mod pipeline;
pub mod recommendations;
pub mod routes;
pub mod skin_api;
pub mod storage;
mod text;
