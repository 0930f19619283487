pub mod api;
pub mod config;
pub mod controller;
pub mod errors;
pub mod label;
pub mod logging;
pub mod manifest;
pub mod reconciler;
pub mod store;

pub use controller::{Controller, ControllerOptions};
pub use reconciler::{Action, Reconciler};
pub use store::{Client, InMemoryStore};
