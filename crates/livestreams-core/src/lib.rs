pub mod catalog;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod guide;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod schedule;
pub mod store;
