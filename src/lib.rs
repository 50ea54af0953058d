pub mod auth;
pub mod config;
pub mod export;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod schema;
pub mod service;
pub mod sql;
pub mod store;
pub mod tls;
pub mod wire;
