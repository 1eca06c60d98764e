//! Outbound notifications — the estimate text and the ready-for-pickup text.
//!
//! The estimate text is logged as `estimate` with its repair attached; a later
//! `YES` from the same number is correlated through that row.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::billing::{CostCalculator, format_money};
use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::logger::MessageLogger;
use crate::pipeline::types::{MessageType, NewSmsMessage};
use crate::shop::{Client, Estimate, Repair};
use crate::sms::SmsSender;
use crate::store::ShopStore;

/// A text that was handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub sid: String,
    pub to: String,
    pub body: String,
}

pub struct Notifier {
    store: Arc<dyn ShopStore>,
    sender: Arc<dyn SmsSender>,
    calculator: CostCalculator,
    logger: MessageLogger,
    shop_name: String,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn ShopStore>,
        sender: Arc<dyn SmsSender>,
        calculator: CostCalculator,
        shop_name: impl Into<String>,
    ) -> Self {
        Self {
            logger: MessageLogger::new(store.clone()),
            store,
            sender,
            calculator,
            shop_name: shop_name.into(),
        }
    }

    /// Text an estimate to the repair's client and stamp it as notified.
    pub async fn send_estimate(
        &self,
        repair_id: i64,
        estimate_id: i64,
    ) -> Result<Notification, PipelineError> {
        let repair = self.repair(repair_id).await?;
        let estimate = match self.store.get_estimate(estimate_id).await? {
            Some(e) if e.repair_id == repair_id => e,
            _ => return Err(not_found("estimate", estimate_id)),
        };
        let (client, phone) = self.recipient(&repair).await?;

        let body = self.estimate_text(&repair, &estimate);
        let sent = self.sender.send(&phone, &body).await?;

        // A later YES finds the repair through this row, so it must land.
        self.store
            .insert_sms_message(
                &NewSmsMessage::outbound(self.sender.from_number(), &sent.to, &body, MessageType::Estimate)
                    .with_sid(sent.sid.clone())
                    .with_client(Some(client.id))
                    .with_repair(Some(repair.id)),
            )
            .await
            .map_err(|e| {
                error!(repair_id, estimate_id, sid = %sent.sid, error = %e, "Estimate text sent but not logged");
                e
            })?;
        self.store
            .mark_estimate_notified(estimate.id, Utc::now())
            .await?;

        info!(
            repair_id,
            estimate_id,
            to = %sent.to,
            sid = %sent.sid,
            "Estimate text sent"
        );
        Ok(Notification {
            sid: sent.sid,
            to: sent.to,
            body,
        })
    }

    /// Tell the client the repair is ready, quoting the amount due.
    pub async fn send_ready_for_pickup(
        &self,
        repair_id: i64,
    ) -> Result<Notification, PipelineError> {
        let repair = self.repair(repair_id).await?;
        let parts = self.store.list_repair_parts(repair_id).await?;
        let (client, phone) = self.recipient(&repair).await?;

        let due = self.calculator.amount_due(&repair, &parts).amount_due;
        let body = format!(
            "{}: Hi {}, your {} (claim {}) is ready for pickup. Amount due: {}.",
            self.shop_name,
            first_name(&client.name),
            device_label(&repair),
            repair.claim_number,
            format_money(due)
        );
        let sent = self.sender.send(&phone, &body).await?;

        self.logger
            .log_outbound(
                NewSmsMessage::outbound(self.sender.from_number(), &sent.to, &body, MessageType::General)
                    .with_sid(sent.sid.clone())
                    .with_client(Some(client.id))
                    .with_repair(Some(repair.id)),
            )
            .await;

        info!(repair_id, to = %sent.to, amount_due = %due, "Pickup text sent");
        Ok(Notification {
            sid: sent.sid,
            to: sent.to,
            body,
        })
    }

    async fn repair(&self, repair_id: i64) -> Result<Repair, PipelineError> {
        self.store
            .get_repair(repair_id)
            .await?
            .ok_or_else(|| not_found("repair", repair_id))
    }

    async fn recipient(&self, repair: &Repair) -> Result<(Client, String), PipelineError> {
        let client = self
            .store
            .get_client(repair.client_id)
            .await?
            .ok_or_else(|| not_found("client", repair.client_id))?;
        let phone = match client.phone.clone().filter(|p| !p.is_empty()) {
            Some(phone) => Some(phone),
            None => self
                .store
                .list_client_phones(client.id)
                .await?
                .into_iter()
                .next(),
        };
        match phone {
            Some(phone) => Ok((client, phone)),
            None => Err(PipelineError::Notify(format!(
                "client {} has no phone number",
                client.id
            ))),
        }
    }

    fn estimate_text(&self, repair: &Repair, estimate: &Estimate) -> String {
        format!(
            "{}: Your estimate for {} (claim {}) is {} (labor {}, parts {}). Reply YES to approve.",
            self.shop_name,
            device_label(repair),
            repair.claim_number,
            format_money(estimate.total_cost),
            format_money(estimate.labor_cost),
            format_money(estimate.parts_cost)
        )
    }
}

fn not_found(entity: &str, id: i64) -> PipelineError {
    PipelineError::Database(DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    })
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("there")
}

fn device_label(repair: &Repair) -> &str {
    if repair.device.trim().is_empty() {
        "device"
    } else {
        repair.device.trim()
    }
}
