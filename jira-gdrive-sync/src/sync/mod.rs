pub mod api;
pub mod backoff;
pub mod cache;
pub mod delete;
pub mod engine;
pub mod folders;
pub mod model;
pub mod paths;
pub mod phase;
pub mod reconcile;
pub mod source;
pub mod store;
#[cfg(test)]
mod testing;
pub mod transfer;
pub mod tree;
