//! Tunables the core consults on every unit of work.
//!
//! Loading from files and the environment lives in `tb-configs`; this
//! struct is plain data so tests can build it directly.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// The single account that always resolves to `Owner`
    pub owner_username: String,
    /// How long a freshly issued or renewed session stays valid
    pub session_lifespan: Duration,
    /// Uses within this window after (re)issue do not touch the deadline
    pub renew_grace: Duration,
    /// Upper bound for `create_token(uses)`
    pub max_token_uses: i64,
    /// Upper bound for `Page::count`
    pub max_page_count: u32,
    pub password_min_len: usize,
    pub max_tag_len: usize,
    /// Bound on a single password hash or verification
    pub hash_timeout: Duration,
    /// Bound on a whole unit of work
    pub transaction_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            owner_username: "admin".to_string(),
            session_lifespan: Duration::from_secs(60 * 60 * 24 * 30),
            renew_grace: Duration::from_secs(60 * 60),
            max_token_uses: 100,
            max_page_count: 100,
            password_min_len: 8,
            max_tag_len: 64,
            hash_timeout: Duration::from_secs(10),
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

impl CoreConfig {
    pub fn lifespan(&self) -> TimeDelta {
        to_delta(self.session_lifespan)
    }

    pub fn grace(&self) -> TimeDelta {
        to_delta(self.renew_grace)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(365 * 100))
}
