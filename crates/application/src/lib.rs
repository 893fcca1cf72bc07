#![forbid(unsafe_code)]

pub mod alert_service;
pub mod retry;
pub mod rule_compiler;
pub mod rule_service;
pub mod rule_store;
