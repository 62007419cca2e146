// src/admin/mod.rs
mod builder;
mod handler;

pub use builder::{AdminServer, AdminServerBuilder};
pub use handler::AdminHandler;
