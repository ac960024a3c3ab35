pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod provider;
pub mod tool;
