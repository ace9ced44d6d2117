//! Core domain types and logic of the indicator engine.

pub mod assembler;
pub mod cache;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod price;
pub mod registry;
pub mod sandbox;
pub mod validator;
