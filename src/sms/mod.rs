//! Messaging-provider protocol: numbers, signatures, replies, outbound REST.

pub mod client;
pub mod phone;
pub mod signature;
pub mod twiml;

pub use client::{SentSms, SmsSender, TwilioClient, TwilioConfig};
pub use phone::normalize_phone;
pub use signature::{SignatureCheck, SignatureValidator};
pub use twiml::TwimlReply;
