//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `auth`: JWT validation for hub connections
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `postgres`: PostgreSQL connection pool and migrations
//! - `redis`: Redis connection pool and reconnect backoff

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
