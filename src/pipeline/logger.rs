//! Append-only SMS log writer.
//!
//! Logging never blocks the protocol reply: store errors are reported at
//! `error` and dropped.

use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use crate::pipeline::types::{InboundSms, MessageType, NewSmsMessage};
use crate::store::ShopStore;

pub struct MessageLogger {
    store: Arc<dyn ShopStore>,
}

impl MessageLogger {
    pub fn new(store: Arc<dyn ShopStore>) -> Self {
        Self { store }
    }

    /// Whether this provider message id was already received.
    ///
    /// A failed lookup answers `false` so the message is still processed.
    pub async fn already_received(&self, provider_sid: Option<&str>) -> bool {
        let Some(sid) = provider_sid else {
            return false;
        };
        match self.store.inbound_sid_exists(sid).await {
            Ok(seen) => seen,
            Err(e) => {
                error!(sid, error = %e, "Duplicate check failed");
                false
            }
        }
    }

    pub async fn log_inbound(
        &self,
        sms: &InboundSms,
        message_type: MessageType,
        client_id: Option<i64>,
        repair_id: Option<i64>,
    ) -> Option<Uuid> {
        let record = NewSmsMessage::inbound(sms, message_type)
            .with_client(client_id)
            .with_repair(repair_id);
        self.append(&record).await
    }

    pub async fn log_outbound(&self, record: NewSmsMessage) -> Option<Uuid> {
        self.append(&record).await
    }

    async fn append(&self, record: &NewSmsMessage) -> Option<Uuid> {
        match self.store.insert_sms_message(record).await {
            Ok(id) => {
                debug!(
                    sms_id = %id,
                    direction = record.direction.as_str(),
                    message_type = %record.message_type,
                    "SMS logged"
                );
                Some(id)
            }
            Err(e) => {
                error!(
                    direction = record.direction.as_str(),
                    from = %record.from_number,
                    to = %record.to_number,
                    error = %e,
                    "Failed to log SMS"
                );
                None
            }
        }
    }
}
