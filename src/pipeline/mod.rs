//! Inbound SMS pipeline.
//!
//! Every authenticated webhook delivery flows through:
//! 1. `ClientResolver::resolve()` — phone number → known client
//! 2. `classify()` — keyword grammar → one `Intent`
//! 3. `EstimateApprovalSaga` — only for an approving `YES`
//! 4. `MessageLogger` — inbound message and any reply, append-only
//!
//! `InboundProcessor` ties the steps together and always yields a reply.

pub mod approval;
pub mod classifier;
pub mod logger;
pub mod processor;
pub mod resolver;
pub mod types;

pub use processor::{InboundProcessor, ProcessedSms};
pub use types::{InboundSms, Intent};
