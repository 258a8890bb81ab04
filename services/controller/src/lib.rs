//! Vesta controller: reconciles role templates and binding declarations into
//! the low-level roles and bindings a cluster authorizer evaluates.
pub mod access;
pub mod app;
pub mod config;
pub mod driver;
pub mod index;
pub mod lifecycle;
pub mod manifest;
pub mod model;
pub mod observability;
pub mod reconcile;
pub mod store;

pub use app::{Controller, build_controller};
