//! Repair SMS — inbound text handling, estimate approval, and repair billing.

pub mod billing;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod shop;
pub mod sms;
pub mod store;
pub mod webhook;
