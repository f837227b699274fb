use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{FB_ADSET_FIELDS, FB_CAMPAIGN_FIELDS};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub account_status: Option<i64>,
}

impl AdAccount {
    /// Numeric account id, without the `act_` prefix the Graph API puts on `id`.
    pub fn account_id(&self) -> &str {
        self.id.strip_prefix("act_").unwrap_or(&self.id)
    }

    pub fn status(&self) -> &'static str {
        match self.account_status {
            Some(1) => "ACTIVE",
            Some(2) => "DISABLED",
            _ => "INACTIVE",
        }
    }
}

/// Columns stamped onto every row fetched under an account.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentContext {
    pub account_id: String,
    pub account_name: String,
    pub collected_at: DateTime<Utc>,
}

impl ParentContext {
    pub fn for_account(account: &AdAccount, collected_at: DateTime<Utc>) -> Self {
        Self {
            account_id: account.account_id().to_string(),
            account_name: account.name.clone(),
            collected_at,
        }
    }
}

/// The per-account collections that end up as warehouse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Campaigns,
    AdSets,
    Insights,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Campaigns, Collection::AdSets, Collection::Insights];

    /// Warehouse table name; doubles as the Graph API edge under `act_<id>`.
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::Campaigns => "campaigns",
            Collection::AdSets => "adsets",
            Collection::Insights => "insights",
        }
    }

    pub fn fallback_filename(self) -> String {
        format!("{}.csv", self.table_name())
    }

    /// Fixed field list, `None` for insights whose fields come from config.
    pub fn default_fields(self) -> Option<&'static [&'static str]> {
        match self {
            Collection::Campaigns => Some(FB_CAMPAIGN_FIELDS),
            Collection::AdSets => Some(FB_ADSET_FIELDS),
            Collection::Insights => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}
