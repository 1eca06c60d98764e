//! `ShopStore` trait — single async interface for everything the SMS core persists.
//!
//! Covers the shop records it reads (clients, repairs, estimates, parts,
//! notes), the few writes it performs, and the append-only message log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{MessageType, NewSmsMessage, SmsMessage};
use crate::shop::{
    Client, Estimate, NewClient, NewEstimate, NewRepair, NewRepairPart, Repair, RepairNote,
    RepairPart,
};

/// The writes that make up one estimate approval, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct ApprovalPlan {
    pub estimate_id: i64,
    pub repair_id: i64,
    pub approved_at: DateTime<Utc>,
    /// Copied onto the repair.
    pub labor_cost: rust_decimal::Decimal,
    /// Line item for the estimate's parts; `None` when parts cost nothing.
    pub parts_line: Option<NewRepairPart>,
    pub note_author: String,
    pub note: String,
}

/// Result of applying an [`ApprovalPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalWrite {
    /// Every write landed.
    Applied {
        part_id: Option<i64>,
        note_id: i64,
    },
    /// The estimate was no longer pending; nothing was written.
    AlreadyResolved,
}

/// Backend-agnostic persistence for the shop and its SMS log.
#[async_trait]
pub trait ShopStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Clients ─────────────────────────────────────────────────────

    /// Insert a client. The phone is normalized before it is stored.
    async fn create_client(&self, client: &NewClient) -> Result<i64, DatabaseError>;

    async fn get_client(&self, id: i64) -> Result<Option<Client>, DatabaseError>;

    /// Attach an additional phone number to a client.
    async fn add_client_phone(
        &self,
        client_id: i64,
        phone: &str,
        label: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// The client's listed phone numbers, oldest first.
    async fn list_client_phones(&self, client_id: i64) -> Result<Vec<String>, DatabaseError>;

    /// First client whose phone list contains `phone` (normalized).
    async fn find_client_by_listed_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Client>, DatabaseError>;

    /// First client whose primary phone field equals `phone` (normalized).
    async fn find_client_by_primary_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Client>, DatabaseError>;

    /// Set the SMS consent flag. Returns `false` if the client does not exist.
    async fn set_client_sms_opt_in(
        &self,
        client_id: i64,
        opted_in: bool,
    ) -> Result<bool, DatabaseError>;

    // ── Repairs ─────────────────────────────────────────────────────

    async fn create_repair(&self, repair: &NewRepair) -> Result<i64, DatabaseError>;

    async fn get_repair(&self, id: i64) -> Result<Option<Repair>, DatabaseError>;

    async fn add_repair_part(&self, part: &NewRepairPart) -> Result<i64, DatabaseError>;

    /// Line items in insertion order.
    async fn list_repair_parts(&self, repair_id: i64) -> Result<Vec<RepairPart>, DatabaseError>;

    /// Notes in insertion order.
    async fn list_repair_notes(&self, repair_id: i64) -> Result<Vec<RepairNote>, DatabaseError>;

    // ── Estimates ───────────────────────────────────────────────────

    /// Insert a pending estimate; `total_cost` is derived.
    async fn create_estimate(&self, estimate: &NewEstimate) -> Result<i64, DatabaseError>;

    async fn get_estimate(&self, id: i64) -> Result<Option<Estimate>, DatabaseError>;

    /// Most recently created pending estimate on a repair.
    async fn latest_pending_estimate(
        &self,
        repair_id: i64,
    ) -> Result<Option<Estimate>, DatabaseError>;

    /// Stamp the date the client was sent the estimate.
    async fn mark_estimate_notified(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Apply an approval atomically.
    ///
    /// The estimate moves to approved only if it is still pending; the repair,
    /// part line, and note are written in the same transaction.
    async fn apply_estimate_approval(
        &self,
        plan: &ApprovalPlan,
    ) -> Result<ApprovalWrite, DatabaseError>;

    // ── SMS log ─────────────────────────────────────────────────────

    /// Append a message to the log.
    async fn insert_sms_message(&self, message: &NewSmsMessage) -> Result<Uuid, DatabaseError>;

    /// Whether an inbound message with this provider id was already logged.
    async fn inbound_sid_exists(&self, provider_sid: &str) -> Result<bool, DatabaseError>;

    /// Most recent outbound message of `message_type` sent to `to_number`.
    async fn latest_outbound_message(
        &self,
        to_number: &str,
        message_type: MessageType,
    ) -> Result<Option<SmsMessage>, DatabaseError>;

    /// Conversation with one number (either direction), newest first.
    async fn list_sms_messages_for_number(
        &self,
        number: &str,
        limit: usize,
    ) -> Result<Vec<SmsMessage>, DatabaseError>;

    async fn count_sms_messages(&self) -> Result<i64, DatabaseError>;
}
