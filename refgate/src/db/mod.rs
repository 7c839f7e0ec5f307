//! Storage layer.
//!
//! - [`store`]: the [`store::Store`] trait with in-memory and (feature `postgres`) PostgreSQL backends
//! - [`models`]: request/response structs passed across the store boundary
//! - [`errors`]: [`errors::DbError`], shared by both backends

pub mod errors;
pub mod models;
pub mod store;
