//! Tenantgate - a multi-tenant sub-application supervisor and gateway
//!
//! This library hosts many tenant applications inside one process:
//! - Routes HTTP traffic to tenants via an ordered resolver chain
//! - Bootstraps tenant applications lazily on first access, deduplicating
//!   concurrent boots onto a single in-flight attempt
//! - Tracks a per-tenant lifecycle with explicit error pinning
//! - Runs host-wide upgrade passes with per-tenant failure isolation
//! - Auto-starts flagged tenants at host startup, in parallel
//! - Supports a single-tenant deployment mode where all traffic routes to
//!   one pinned application

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod gateway;
pub mod lifecycle;
pub mod manager;
pub mod record;
pub mod server;
pub mod supervisor;
pub mod upgrade;
