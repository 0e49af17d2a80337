pub mod config;
pub mod error;
pub mod image;
pub mod io;
pub mod load_balancer;
pub mod network;
pub mod paths;
pub mod registry;
pub mod scaling;
pub mod service;
pub mod stack;
pub mod template;
pub mod types;

pub use error::{RelayError, Result};
pub use stack::{Stack, StackBuilder};
