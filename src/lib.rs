//! Arbiter - policy-based access control decision engine
//!
//! Policies hold allow/deny rules over (resource, action, context), are
//! bound to roles or users and move through draft, active and archived.
//! This library exposes all modules so the binary and the integration
//! tests share one implementation.

pub mod authz;
pub mod decision;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
pub mod subject_sync;
pub mod web;
