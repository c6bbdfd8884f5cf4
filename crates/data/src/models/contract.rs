//! Contract identity model.

use serde::{Deserialize, Serialize};

/// A (source, symbol) pair, the unit of completeness validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContractRef {
    /// Source exchange id
    pub source: String,
    /// Contract symbol
    pub symbol: String,
}

impl ContractRef {
    /// Creates a contract reference.
    #[must_use]
    pub fn new(source: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for ContractRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.symbol)
    }
}
