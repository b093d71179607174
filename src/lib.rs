//! Bank Sync Service - Open Banking transaction sync with invoice matching.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod repository;
pub mod services;
pub mod startup;
