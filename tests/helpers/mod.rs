#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::PolicyBuilder;
pub use db::{seed_role, seed_user, TestDb};
