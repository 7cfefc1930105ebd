//! Shared utilities for feature modules

pub mod pagination;

pub use pagination::{Paginated, PaginationMetadata, PaginationParams};
