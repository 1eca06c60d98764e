//! Phone number → client lookup.
//!
//! The explicit phone list wins; the legacy primary-phone field is only
//! consulted when no listed number matches. An unknown number is not an error.

use std::sync::Arc;

use tracing::debug;

use crate::error::DatabaseError;
use crate::pipeline::types::ResolvedClient;
use crate::shop::Client;
use crate::store::ShopStore;

pub struct ClientResolver {
    store: Arc<dyn ShopStore>,
}

impl ClientResolver {
    pub fn new(store: Arc<dyn ShopStore>) -> Self {
        Self { store }
    }

    /// Resolve a normalized phone number to a client.
    pub async fn resolve(&self, phone: &str) -> Result<Option<ResolvedClient>, DatabaseError> {
        if phone.is_empty() {
            return Ok(None);
        }

        if let Some(client) = self.store.find_client_by_listed_phone(phone).await? {
            debug!(phone, client_id = client.id, "Client matched by phone list");
            return Ok(Some(to_resolved(client)));
        }

        if let Some(client) = self.store.find_client_by_primary_phone(phone).await? {
            debug!(phone, client_id = client.id, "Client matched by primary phone");
            return Ok(Some(to_resolved(client)));
        }

        debug!(phone, "No client for phone");
        Ok(None)
    }
}

fn to_resolved(client: Client) -> ResolvedClient {
    ResolvedClient {
        id: client.id,
        name: client.name,
        sms_opted_in: client.sms_opted_in,
    }
}
