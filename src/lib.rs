// src/lib.rs — Library root for Switchboard

pub mod api;
pub mod catalog;
pub mod cli;
pub mod health;
pub mod infra;
pub mod provider;
pub mod routing;
