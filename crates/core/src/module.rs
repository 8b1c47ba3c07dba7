//! Business modules a company can enable.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Inventory,
    Sales,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Inventory => "inventory",
            Module::Sales => "sales",
        }
    }
}

impl core::fmt::Display for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Module {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory" => Ok(Module::Inventory),
            "sales" => Ok(Module::Sales),
            other => Err(DomainError::validation(format!("unknown module '{other}'"))),
        }
    }
}
