//! NetScan: a distributed network-probing fleet.
//!
//! A controller accepts user-defined checks (HTTP(S), TCP ping, DNS, raw
//! TCP connect), fans each check out to a pool of registered agents over a
//! broker queue, collects their results, and exposes aggregated status via
//! an HTTP API. Agents pull tasks, execute probes, and submit results.

pub mod agent;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod runner;
pub mod service;
pub mod store;
pub mod web;
