//! Inbound SMS processor — one authenticated webhook delivery in, one reply out.
//!
//! Flow:
//! 1. Duplicate check on the provider message id → empty reply
//! 2. Resolve the sender to a client
//! 3. Look up an approvable estimate (only for `YES` from a known client)
//! 4. Classify, then act on the intent
//! 5. Log the inbound message, then the reply actually sent
//!
//! Nothing in here fails the request: any error degrades to a `general`
//! classification with an empty reply.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::billing::format_money;
use crate::error::PipelineError;
use crate::pipeline::approval::{ApprovalOutcome, ApprovalReceipt, EstimateApprovalSaga};
use crate::pipeline::classifier::{ClassifyContext, classify, needs_approval_lookup};
use crate::pipeline::logger::MessageLogger;
use crate::pipeline::resolver::ClientResolver;
use crate::pipeline::types::{ApprovalTarget, InboundSms, Intent, NewSmsMessage, ResolvedClient};
use crate::sms::TwimlReply;
use crate::store::ShopStore;

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSms {
    /// Final intent after any approval fallback.
    pub intent: Intent,
    pub client_id: Option<i64>,
    pub repair_id: Option<i64>,
    pub reply: TwimlReply,
    /// The provider re-delivered a message already handled.
    pub duplicate: bool,
}

/// What acting on an intent produced, before logging.
struct Outcome {
    intent: Intent,
    client_id: Option<i64>,
    repair_id: Option<i64>,
    reply: Option<String>,
}

impl Outcome {
    fn general(client_id: Option<i64>) -> Self {
        Self {
            intent: Intent::General,
            client_id,
            repair_id: None,
            reply: None,
        }
    }
}

pub struct InboundProcessor {
    store: Arc<dyn ShopStore>,
    resolver: ClientResolver,
    saga: EstimateApprovalSaga,
    logger: MessageLogger,
    shop_name: String,
}

impl InboundProcessor {
    pub fn new(store: Arc<dyn ShopStore>, shop_name: impl Into<String>) -> Self {
        Self {
            resolver: ClientResolver::new(store.clone()),
            saga: EstimateApprovalSaga::new(store.clone()),
            logger: MessageLogger::new(store.clone()),
            store,
            shop_name: shop_name.into(),
        }
    }

    /// Handle one inbound message. Always produces a reply.
    pub async fn handle(&self, sms: InboundSms) -> ProcessedSms {
        info!(
            sid = sms.message_sid.as_deref().unwrap_or("-"),
            from = %sms.from,
            to = %sms.to,
            "Processing inbound SMS"
        );
        debug!(body = %sms.body, "Inbound SMS body");

        if self.logger.already_received(sms.message_sid.as_deref()).await {
            info!(
                sid = sms.message_sid.as_deref().unwrap_or("-"),
                "Duplicate delivery, acknowledging without processing"
            );
            return ProcessedSms {
                intent: Intent::General,
                client_id: None,
                repair_id: None,
                reply: TwimlReply::empty(),
                duplicate: true,
            };
        }

        let outcome = self.run(&sms).await;

        self.logger
            .log_inbound(
                &sms,
                outcome.intent.message_type(),
                outcome.client_id,
                outcome.repair_id,
            )
            .await;

        let reply = match &outcome.reply {
            Some(text) => {
                // The reply goes back from the number the client texted.
                let record = NewSmsMessage::outbound(
                    &sms.to,
                    &sms.from,
                    text,
                    outcome.intent.message_type(),
                )
                .with_client(outcome.client_id)
                .with_repair(outcome.repair_id);
                self.logger.log_outbound(record).await;
                TwimlReply::message(text.clone())
            }
            None => TwimlReply::empty(),
        };

        info!(
            from = %sms.from,
            intent = outcome.intent.label(),
            client_id = ?outcome.client_id,
            replied = outcome.reply.is_some(),
            "Inbound SMS handled"
        );

        ProcessedSms {
            intent: outcome.intent,
            client_id: outcome.client_id,
            repair_id: outcome.repair_id,
            reply,
            duplicate: false,
        }
    }

    async fn run(&self, sms: &InboundSms) -> Outcome {
        let client = match self.resolver.resolve(&sms.from).await {
            Ok(client) => client,
            Err(e) => {
                error!(from = %sms.from, error = %e, "Client lookup failed");
                return Outcome::general(None);
            }
        };
        let client_id = client.as_ref().map(|c| c.id);

        match self.act(sms, client).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(from = %sms.from, error = %e, "Inbound SMS processing failed");
                Outcome::general(client_id)
            }
        }
    }

    async fn act(
        &self,
        sms: &InboundSms,
        client: Option<ResolvedClient>,
    ) -> Result<Outcome, PipelineError> {
        let keyword = sms.keyword();
        let approval = if needs_approval_lookup(&keyword, client.as_ref()) {
            self.saga.find_target(&sms.from).await?
        } else {
            None
        };

        let client_id = client.as_ref().map(|c| c.id);
        let intent = classify(
            &keyword,
            &ClassifyContext {
                client: client.clone(),
                approval,
            },
        );

        match intent {
            Intent::OptOut => {
                if let Some(id) = client_id {
                    self.set_consent(id, false).await?;
                }
                Ok(Outcome {
                    intent,
                    client_id,
                    repair_id: None,
                    reply: None,
                })
            }
            Intent::OptIn => self.opt_in(client_id).await,
            Intent::EstimateApproval {
                repair_id,
                estimate_id,
            } => {
                let target = ApprovalTarget {
                    repair_id,
                    estimate_id,
                };
                match self.saga.apply(target, Utc::now()).await? {
                    ApprovalOutcome::Applied(receipt) => Ok(Outcome {
                        intent,
                        client_id,
                        repair_id: Some(receipt.repair_id),
                        reply: Some(self.approval_text(client.as_ref(), &receipt)),
                    }),
                    ApprovalOutcome::AlreadyResolved => {
                        info!(
                            repair_id,
                            estimate_id, "Estimate already resolved, treating YES as opt-in"
                        );
                        self.opt_in(client_id).await
                    }
                }
            }
            Intent::General => Ok(Outcome::general(client_id)),
        }
    }

    async fn opt_in(&self, client_id: Option<i64>) -> Result<Outcome, PipelineError> {
        let reply = match client_id {
            Some(id) => {
                self.set_consent(id, true).await?;
                self.opt_in_text()
            }
            None => self.unknown_number_text(),
        };
        Ok(Outcome {
            intent: Intent::OptIn,
            client_id,
            repair_id: None,
            reply: Some(reply),
        })
    }

    async fn set_consent(&self, client_id: i64, opted_in: bool) -> Result<(), PipelineError> {
        if !self.store.set_client_sms_opt_in(client_id, opted_in).await? {
            warn!(client_id, "Client vanished before consent update");
        } else {
            info!(client_id, opted_in, "SMS consent recorded");
        }
        Ok(())
    }

    fn opt_in_text(&self) -> String {
        format!(
            "You're subscribed to text updates from {}. Reply STOP to unsubscribe.",
            self.shop_name
        )
    }

    /// Nothing was recorded, so the reply must not claim a subscription.
    fn unknown_number_text(&self) -> String {
        format!(
            "{} doesn't have this number on file, so text updates can't be turned on. Please call the shop to add it.",
            self.shop_name
        )
    }

    fn approval_text(&self, client: Option<&ResolvedClient>, receipt: &ApprovalReceipt) -> String {
        let greeting = match client.and_then(|c| c.name.split_whitespace().next()) {
            Some(first) => format!("Thanks, {first}!"),
            None => "Thanks!".to_string(),
        };
        format!(
            "{greeting} Your estimate of {} is approved and {} will start on your repair.",
            format_money(receipt.labor_cost + receipt.parts_cost),
            self.shop_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Direction, MessageType};
    use crate::shop::{EstimateStatus, NewClient, NewEstimate, NewRepair, RepairStatus};
    use crate::store::LibSqlBackend;
    use rust_decimal_macros::dec;

    const CLIENT_PHONE: &str = "5551234567";
    const SHOP_PHONE: &str = "5550001111";

    struct Harness {
        store: Arc<LibSqlBackend>,
        processor: InboundProcessor,
    }

    async fn harness() -> Harness {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let processor = InboundProcessor::new(store.clone(), "Fixit Labs");
        Harness { store, processor }
    }

    async fn known_client(h: &Harness) -> i64 {
        h.store
            .create_client(&NewClient {
                name: "Dana Whitfield".into(),
                phone: Some(CLIENT_PHONE.into()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    /// A repair in `estimate` with a pending estimate that was texted to the client.
    async fn texted_estimate(h: &Harness, client_id: i64) -> (i64, i64) {
        let repair_id = h
            .store
            .create_repair(&NewRepair {
                client_id,
                claim_number: "R-100".into(),
                status: RepairStatus::Estimate,
                ..Default::default()
            })
            .await
            .unwrap();
        let estimate_id = h
            .store
            .create_estimate(&NewEstimate {
                repair_id,
                label: None,
                labor_cost: dec!(150.00),
                parts_cost: dec!(50.00),
            })
            .await
            .unwrap();
        h.store
            .insert_sms_message(
                &NewSmsMessage::outbound(SHOP_PHONE, CLIENT_PHONE, "Estimate", MessageType::Estimate)
                    .with_client(Some(client_id))
                    .with_repair(Some(repair_id)),
            )
            .await
            .unwrap();
        (repair_id, estimate_id)
    }

    fn sms(sid: &str, body: &str) -> InboundSms {
        InboundSms {
            message_sid: Some(sid.into()),
            from: CLIENT_PHONE.into(),
            to: SHOP_PHONE.into(),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn stop_opts_out_without_reply() {
        let h = harness().await;
        let id = known_client(&h).await;
        h.store.set_client_sms_opt_in(id, true).await.unwrap();

        let out = h.processor.handle(sms("SM1", " Stop ")).await;
        assert_eq!(out.intent, Intent::OptOut);
        assert!(out.reply.text().is_none());
        assert!(!h.store.get_client(id).await.unwrap().unwrap().sms_opted_in);
    }

    #[tokio::test]
    async fn yes_without_estimate_opts_in() {
        let h = harness().await;
        let id = known_client(&h).await;

        let out = h.processor.handle(sms("SM1", "yes")).await;
        assert_eq!(out.intent, Intent::OptIn);
        assert!(out.reply.text().unwrap().contains("Fixit Labs"));
        assert!(h.store.get_client(id).await.unwrap().unwrap().sms_opted_in);
    }

    #[tokio::test]
    async fn yes_with_pending_estimate_approves() {
        let h = harness().await;
        let client_id = known_client(&h).await;
        let (repair_id, estimate_id) = texted_estimate(&h, client_id).await;

        let out = h.processor.handle(sms("SM1", "YES")).await;
        assert_eq!(
            out.intent,
            Intent::EstimateApproval {
                repair_id,
                estimate_id
            }
        );
        assert_eq!(out.repair_id, Some(repair_id));
        let text = out.reply.text().unwrap();
        assert!(text.contains("Dana"));
        assert!(text.contains("$200.00"));

        let estimate = h.store.get_estimate(estimate_id).await.unwrap().unwrap();
        assert_eq!(estimate.status, EstimateStatus::Approved);
        let repair = h.store.get_repair(repair_id).await.unwrap().unwrap();
        assert_eq!(repair.status, RepairStatus::Repairing);
    }

    #[tokio::test]
    async fn second_yes_falls_back_to_opt_in() {
        let h = harness().await;
        let client_id = known_client(&h).await;
        let (repair_id, _) = texted_estimate(&h, client_id).await;

        h.processor.handle(sms("SM1", "YES")).await;
        let out = h.processor.handle(sms("SM2", "YES")).await;
        assert_eq!(out.intent, Intent::OptIn);
        assert_eq!(h.store.list_repair_parts(repair_id).await.unwrap().len(), 1);
        assert_eq!(h.store.list_repair_notes(repair_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_sid_is_not_reprocessed() {
        let h = harness().await;
        let client_id = known_client(&h).await;
        let (repair_id, _) = texted_estimate(&h, client_id).await;

        let first = h.processor.handle(sms("SM1", "YES")).await;
        assert!(!first.duplicate);
        let again = h.processor.handle(sms("SM1", "YES")).await;
        assert!(again.duplicate);
        assert!(again.reply.text().is_none());
        assert_eq!(h.store.list_repair_parts(repair_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sender_is_general_and_logged() {
        let h = harness().await;
        let out = h.processor.handle(sms("SM1", "YES")).await;
        assert_eq!(out.intent, Intent::General);
        assert!(out.client_id.is_none());
        assert!(out.reply.text().is_none());

        let log = h
            .store
            .list_sms_messages_for_number(CLIENT_PHONE, 10)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].direction, Direction::Inbound);
        assert_eq!(log[0].message_type, MessageType::General);
    }

    #[tokio::test]
    async fn start_from_unknown_number_does_not_claim_subscription() {
        let h = harness().await;
        let out = h.processor.handle(sms("SM1", "START")).await;
        assert_eq!(out.intent, Intent::OptIn);
        assert!(out.client_id.is_none());
        let text = out.reply.text().unwrap();
        assert!(!text.contains("subscribed"));
        assert!(text.contains("doesn't have this number on file"));
    }

    #[tokio::test]
    async fn reply_is_logged_as_outbound() {
        let h = harness().await;
        let client_id = known_client(&h).await;

        h.processor.handle(sms("SM1", "START")).await;
        let log = h
            .store
            .list_sms_messages_for_number(CLIENT_PHONE, 10)
            .await
            .unwrap();
        assert_eq!(log.len(), 2);
        let outbound = log
            .iter()
            .find(|m| m.direction == Direction::Outbound)
            .unwrap();
        assert_eq!(outbound.from_number, SHOP_PHONE);
        assert_eq!(outbound.to_number, CLIENT_PHONE);
        assert_eq!(outbound.client_id, Some(client_id));
        assert_eq!(outbound.message_type, MessageType::OptIn);
    }
}
