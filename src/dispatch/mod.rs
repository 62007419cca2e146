// src/dispatch/mod.rs
mod dispatcher;

pub use dispatcher::{OperationDispatcher, OperationResult};
