//! Invoice number generation
//!
//! Numbers are human-facing: `"{prefix}-{10 digits}"` with the branch prefix,
//! unique across all invoices. Collisions are resolved by retrying; after the
//! retry budget a timestamp-based fallback guarantees a usable number without
//! a further uniqueness check.

use rand::Rng;
use tracing::warn;

use crate::error::SettlementError;
use crate::store::SettlementStore;

/// Prefix used when the customer's branch carries none
pub const DEFAULT_PREFIX: &str = "INV";

const MAX_ATTEMPTS: u32 = 5;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates unique, branch-prefixed invoice numbers
pub struct NumberGenerator<'a> {
    store: &'a dyn SettlementStore,
}

impl<'a> NumberGenerator<'a> {
    pub fn new(store: &'a dyn SettlementStore) -> Self {
        Self { store }
    }

    /// Produces a unique invoice number for the given branch prefix.
    ///
    /// Tries random 10-digit candidates against the store; if all attempts
    /// collide, falls back to a millisecond-timestamp number with a random
    /// base36 suffix, which is accepted without another existence check.
    pub async fn generate(&self, prefix: &str) -> Result<String, SettlementError> {
        let prefix = if prefix.trim().is_empty() {
            DEFAULT_PREFIX
        } else {
            prefix.trim()
        };

        for _ in 0..MAX_ATTEMPTS {
            let candidate = {
                let mut rng = rand::thread_rng();
                format!("{}-{:010}", prefix, rng.gen_range(0..10_000_000_000u64))
            };
            if !self.store.invoice_number_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        warn!(prefix, attempts = MAX_ATTEMPTS, "invoice number collisions exhausted retries, using timestamp fallback");
        Ok(fallback_number(prefix))
    }
}

fn fallback_number(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..5)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect()
    };
    format!("{}-{}-{}", prefix, millis, suffix)
}
