use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What cancelling a task does to the tasks waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Dependents are left alone. They stay Pending and never become ready
    /// unless the driver intervenes.
    #[default]
    Isolate,
    /// Every transitive dependent that is still Pending is cancelled too.
    CascadePending,
}

impl CancelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelPolicy::Isolate => "isolate",
            CancelPolicy::CascadePending => "cascade_pending",
        }
    }
}

impl fmt::Display for CancelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "isolate" => Ok(CancelPolicy::Isolate),
            "cascade_pending" | "cascade" => Ok(CancelPolicy::CascadePending),
            other => Err(format!("unknown cancel policy: {other}")),
        }
    }
}
