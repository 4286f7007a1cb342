//! Core library: scanning, naming, classification and the routing session.

pub mod classifier;
pub mod config;
pub mod error;
pub mod folder;
pub mod learning;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod rules;
pub mod scanner;
pub mod template;
