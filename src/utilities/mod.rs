//! Shared helpers: error types, JSON recovery and template interpolation.

pub mod converter;
pub mod errors;
pub mod string_utils;
