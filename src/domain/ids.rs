use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Identifier of a recorded infraction.
    InfractionId
);
entity_id!(
    /// Identifier of a ticket (procès-verbal).
    TicketId
);
entity_id!(PaymentId);
entity_id!(AppealId);

/// Prefixes of the human-facing numbers stamped on entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Ticket,
    Transaction,
    TreasuryReceipt,
    Appeal,
}

impl NumberKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Ticket => "PV",
            Self::Transaction => "TXN",
            Self::TreasuryReceipt => "RCU-TR",
            Self::Appeal => "REC",
        }
    }
}

/// Generates a natural key: `{PREFIX}-{YYYYMMDD}-{8 hex chars}`.
///
/// Uniqueness is enforced again by the store on insert.
pub fn generate_number(kind: NumberKind, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        kind.prefix(),
        at.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_number_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let number = generate_number(NumberKind::TreasuryReceipt, at);
        assert!(number.starts_with("RCU-TR-20250314-"));
        assert_eq!(number.len(), "RCU-TR-20250314-".len() + 8);
    }

    #[test]
    fn test_numbers_are_distinct() {
        let at = Utc::now();
        assert_ne!(
            generate_number(NumberKind::Ticket, at),
            generate_number(NumberKind::Ticket, at)
        );
    }
}
