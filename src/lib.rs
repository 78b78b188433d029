//! Cost-calibrator - empirical calibration of query optimizer cost coefficients
//!
//! This library drives a local `mongod` through controlled cache-cold and
//! cache-warm experiments and reduces the observed execution times to three
//! coefficients: per-document CPU cost, sequential page read cost and random
//! page read cost.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod handle;
pub mod interrupt;
pub mod mongosh;
pub mod populate;
pub mod protocol;
pub mod report;
pub mod sample;
pub mod stats;
