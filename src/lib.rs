//! Development-time request pipeline for the vellum site generator.
//!
//! Requests are dispatched against a route table that is rebuilt as the
//! project changes on disk, rendered inside an isolated module runtime, and
//! failures are attributed back to the request that caused them.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
