pub mod aggregate;
pub mod auth;
pub mod db;
pub mod error;
pub mod lookup;
pub mod models;
pub mod notify;
pub mod service;
pub mod store;
pub mod views;
pub mod window;
