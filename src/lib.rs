//! Two-tier provider cache: an in-process LRU in front of a durable
//! Postgres tier, with per-key request coalescing and maintenance tooling.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
