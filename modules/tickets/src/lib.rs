pub mod bus;
pub mod clients;
pub mod config;
pub mod entities;
pub mod handlers;
pub mod http;
pub mod service;

pub use service::{Service, ServiceDeps, ServiceError};
