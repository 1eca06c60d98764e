//! Keyword classification of inbound texts.
//!
//! Exact, case-insensitive keyword matches on the trimmed body:
//! - carrier opt-out words → `OptOut` (always wins)
//! - `START` / `UNSTOP` → `OptIn`
//! - `YES` from a known client → `EstimateApproval` when an actionable
//!   estimate exists, otherwise `OptIn`
//! - anything else → `General`

use tracing::debug;

use crate::pipeline::types::{ApprovalTarget, Intent, ResolvedClient};

/// Carrier-standard opt-out keywords.
pub const STOP_KEYWORDS: &[&str] = &["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];

/// Keywords that re-subscribe a number.
pub const START_KEYWORDS: &[&str] = &["START", "UNSTOP"];

/// Reply that approves the most recently texted estimate.
pub const APPROVE_KEYWORD: &str = "YES";

/// What the processor already knows when classifying.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub client: Option<ResolvedClient>,
    /// Set only when a pending estimate was confirmed for this sender.
    pub approval: Option<ApprovalTarget>,
}

/// Whether the approval lookup could change the outcome for this message.
///
/// Only a `YES` from a known client can become an approval, so every other
/// message skips the estimate tables.
pub fn needs_approval_lookup(keyword: &str, client: Option<&ResolvedClient>) -> bool {
    keyword == APPROVE_KEYWORD && client.is_some()
}

/// Classify a trimmed, upper-cased body. Exactly one intent per message.
pub fn classify(keyword: &str, ctx: &ClassifyContext) -> Intent {
    let intent = if STOP_KEYWORDS.contains(&keyword) {
        Intent::OptOut
    } else if START_KEYWORDS.contains(&keyword) {
        Intent::OptIn
    } else if keyword == APPROVE_KEYWORD && ctx.client.is_some() {
        match ctx.approval {
            Some(target) => Intent::EstimateApproval {
                repair_id: target.repair_id,
                estimate_id: target.estimate_id,
            },
            None => Intent::OptIn,
        }
    } else {
        Intent::General
    };

    debug!(intent = intent.label(), "Message classified");
    intent
}
