//! Estimate approval by text reply.
//!
//! Finding the target is read-only: the latest outbound estimate text to the
//! sender names a repair, and that repair's newest pending estimate is the one
//! a `YES` approves. Applying it is one store transaction that approves the
//! estimate, moves the repair to repairing with the estimate's labor, adds the
//! parts line and writes an audit note.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::types::{ApprovalTarget, MessageType};
use crate::shop::{EstimateStatus, NewRepairPart, RepairStatus, SYSTEM_ACTOR};
use crate::store::{ApprovalPlan, ApprovalWrite, ShopStore};

/// Name of the custom line item that carries an approved estimate's parts cost.
pub const APPROVED_PARTS_NAME: &str = "Approved Estimate Parts";

/// What an applied approval wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalReceipt {
    pub repair_id: i64,
    pub estimate_id: i64,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
    pub part_id: Option<i64>,
    pub note_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Applied(ApprovalReceipt),
    /// The estimate was approved or declined before this request got to it.
    AlreadyResolved,
}

pub struct EstimateApprovalSaga {
    store: Arc<dyn ShopStore>,
}

impl EstimateApprovalSaga {
    pub fn new(store: Arc<dyn ShopStore>) -> Self {
        Self { store }
    }

    /// The estimate a `YES` from `phone` would approve, if any.
    pub async fn find_target(
        &self,
        phone: &str,
    ) -> Result<Option<ApprovalTarget>, DatabaseError> {
        let Some(sent) = self
            .store
            .latest_outbound_message(phone, MessageType::Estimate)
            .await?
        else {
            debug!(phone, "No estimate text sent to this number");
            return Ok(None);
        };

        let Some(repair_id) = sent.repair_id else {
            debug!(phone, sms_id = %sent.id, "Estimate text has no repair link");
            return Ok(None);
        };

        let Some(estimate) = self.store.latest_pending_estimate(repair_id).await? else {
            debug!(phone, repair_id, "Repair has no pending estimate");
            return Ok(None);
        };

        Ok(Some(ApprovalTarget {
            repair_id,
            estimate_id: estimate.id,
        }))
    }

    /// Approve the target estimate. All writes land together or not at all.
    pub async fn apply(
        &self,
        target: ApprovalTarget,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, PipelineError> {
        let estimate = match self.store.get_estimate(target.estimate_id).await? {
            Some(e) if e.repair_id == target.repair_id && e.status == EstimateStatus::Pending => e,
            _ => return Ok(ApprovalOutcome::AlreadyResolved),
        };
        let repair = self
            .store
            .get_repair(target.repair_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Database(DatabaseError::NotFound {
                    entity: "repair".into(),
                    id: target.repair_id.to_string(),
                })
            })?;

        let parts_line = (estimate.parts_cost > Decimal::ZERO).then(|| NewRepairPart {
            repair_id: target.repair_id,
            part_id: None,
            name: APPROVED_PARTS_NAME.to_string(),
            quantity: 1,
            unit_price: estimate.parts_cost,
        });

        let plan = ApprovalPlan {
            estimate_id: estimate.id,
            repair_id: target.repair_id,
            approved_at: now,
            labor_cost: estimate.labor_cost,
            parts_line,
            note_author: SYSTEM_ACTOR.to_string(),
            note: approval_note(estimate.id, estimate.label.as_deref(), repair.status),
        };

        let write = self
            .store
            .apply_estimate_approval(&plan)
            .await
            .map_err(|e| PipelineError::Approval(format!("estimate {}: {e}", estimate.id)))?;
        match write {
            ApprovalWrite::Applied { part_id, note_id } => {
                info!(
                    repair_id = target.repair_id,
                    estimate_id = estimate.id,
                    labor = %estimate.labor_cost,
                    parts = %estimate.parts_cost,
                    "Estimate approved by SMS"
                );
                Ok(ApprovalOutcome::Applied(ApprovalReceipt {
                    repair_id: target.repair_id,
                    estimate_id: estimate.id,
                    labor_cost: estimate.labor_cost,
                    parts_cost: estimate.parts_cost,
                    part_id,
                    note_id,
                }))
            }
            ApprovalWrite::AlreadyResolved => Ok(ApprovalOutcome::AlreadyResolved),
        }
    }
}

fn approval_note(estimate_id: i64, label: Option<&str>, from: RepairStatus) -> String {
    let name = match label {
        Some(label) => format!("Estimate #{estimate_id} ({label})"),
        None => format!("Estimate #{estimate_id}"),
    };
    if from.is_pre_repair() {
        format!(
            "{name} approved by customer via SMS. Status changed to {}.",
            RepairStatus::Repairing
        )
    } else {
        format!("{name} approved by customer via SMS. Status left at {from}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::NewSmsMessage;
    use crate::shop::{NewClient, NewEstimate, NewRepair};
    use crate::store::LibSqlBackend;
    use rust_decimal_macros::dec;

    const PHONE: &str = "5551234567";
    const SHOP: &str = "5550001111";

    struct Fixture {
        store: Arc<LibSqlBackend>,
        saga: EstimateApprovalSaga,
        repair_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let client_id = store
            .create_client(&NewClient {
                name: "Dana".into(),
                phone: Some(PHONE.into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let repair_id = store
            .create_repair(&NewRepair {
                client_id,
                claim_number: "R-7".into(),
                status: RepairStatus::Estimate,
                ..Default::default()
            })
            .await
            .unwrap();
        let saga = EstimateApprovalSaga::new(store.clone());
        Fixture {
            store,
            saga,
            repair_id,
        }
    }

    async fn send_estimate_text(f: &Fixture, repair_id: Option<i64>) {
        f.store
            .insert_sms_message(
                &NewSmsMessage::outbound(SHOP, PHONE, "Your estimate", MessageType::Estimate)
                    .with_repair(repair_id),
            )
            .await
            .unwrap();
    }

    async fn pending(f: &Fixture, labor: Decimal, parts: Decimal) -> i64 {
        f.store
            .create_estimate(&NewEstimate {
                repair_id: f.repair_id,
                label: None,
                labor_cost: labor,
                parts_cost: parts,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_estimate_text_means_no_target() {
        let f = fixture().await;
        pending(&f, dec!(150), dec!(50)).await;
        assert!(f.saga.find_target(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unlinked_estimate_text_means_no_target() {
        let f = fixture().await;
        pending(&f, dec!(150), dec!(50)).await;
        send_estimate_text(&f, None).await;
        assert!(f.saga.find_target(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn target_is_newest_pending_estimate() {
        let f = fixture().await;
        pending(&f, dec!(100), dec!(0)).await;
        let newest = pending(&f, dec!(150), dec!(50)).await;
        send_estimate_text(&f, Some(f.repair_id)).await;

        let target = f.saga.find_target(PHONE).await.unwrap().unwrap();
        assert_eq!(target.repair_id, f.repair_id);
        assert_eq!(target.estimate_id, newest);
    }

    #[tokio::test]
    async fn apply_writes_every_record() {
        let f = fixture().await;
        let estimate_id = pending(&f, dec!(150.00), dec!(50.00)).await;
        send_estimate_text(&f, Some(f.repair_id)).await;
        let target = f.saga.find_target(PHONE).await.unwrap().unwrap();

        let outcome = f.saga.apply(target, Utc::now()).await.unwrap();
        let ApprovalOutcome::Applied(receipt) = outcome else {
            panic!("expected approval to apply");
        };
        assert_eq!(receipt.estimate_id, estimate_id);
        assert!(receipt.part_id.is_some());

        let repair = f.store.get_repair(f.repair_id).await.unwrap().unwrap();
        assert_eq!(repair.status, RepairStatus::Repairing);
        assert_eq!(repair.labor_cost, dec!(150.00));

        let parts = f.store.list_repair_parts(f.repair_id).await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, APPROVED_PARTS_NAME);
        assert_eq!(parts[0].unit_price, dec!(50.00));

        let notes = f.store.list_repair_notes(f.repair_id).await.unwrap();
        assert_eq!(notes[0].author, SYSTEM_ACTOR);
        assert!(notes[0].content.contains(&format!("#{estimate_id}")));
        assert!(notes[0].content.contains("repairing"));
    }

    #[tokio::test]
    async fn apply_twice_resolves_once() {
        let f = fixture().await;
        pending(&f, dec!(150.00), dec!(50.00)).await;
        send_estimate_text(&f, Some(f.repair_id)).await;
        let target = f.saga.find_target(PHONE).await.unwrap().unwrap();

        assert!(matches!(
            f.saga.apply(target, Utc::now()).await.unwrap(),
            ApprovalOutcome::Applied(_)
        ));
        assert_eq!(
            f.saga.apply(target, Utc::now()).await.unwrap(),
            ApprovalOutcome::AlreadyResolved
        );
        assert_eq!(f.store.list_repair_parts(f.repair_id).await.unwrap().len(), 1);
        assert!(f.saga.find_target(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_keeps_status_of_closed_repair() {
        let f = fixture().await;
        let closed = f
            .store
            .create_repair(&NewRepair {
                client_id: f.store.get_repair(f.repair_id).await.unwrap().unwrap().client_id,
                claim_number: "R-8".into(),
                status: RepairStatus::Closed,
                ..Default::default()
            })
            .await
            .unwrap();
        let estimate_id = f
            .store
            .create_estimate(&NewEstimate {
                repair_id: closed,
                label: None,
                labor_cost: dec!(40.00),
                parts_cost: dec!(0),
            })
            .await
            .unwrap();

        let outcome = f
            .saga
            .apply(
                ApprovalTarget {
                    repair_id: closed,
                    estimate_id,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ApprovalOutcome::Applied(_)));

        let repair = f.store.get_repair(closed).await.unwrap().unwrap();
        assert_eq!(repair.status, RepairStatus::Closed);
        let notes = f.store.list_repair_notes(closed).await.unwrap();
        assert!(notes[0].content.ends_with("Status left at closed."));
    }

    #[test]
    fn note_mentions_label_and_status_change() {
        let note = approval_note(12, Some("Option B"), RepairStatus::Estimate);
        assert!(note.starts_with("Estimate #12 (Option B) approved"));
        assert!(note.ends_with("Status changed to repairing."));
    }
}
