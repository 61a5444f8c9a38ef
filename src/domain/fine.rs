//! Fine calculator.
//!
//! Prices an infraction from its type, an optional speed reading and the flagrant-délit flag.

use super::money::Money;
use crate::error::{LifecycleError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Multiplier applied to the final amount when the offence is caught in the act.
pub const FLAGRANT_DELIT_FACTOR: Decimal = dec!(1.5);

/// Speed-excess tiers: `(upper bound inclusive, amount, points)`.
const SPEED_TIERS: [(Decimal, Decimal, u32); 6] = [
    (dec!(5), dec!(68), 1),
    (dec!(10), dec!(135), 1),
    (dec!(20), dec!(135), 2),
    (dec!(30), dec!(135), 3),
    (dec!(40), dec!(135), 4),
    (dec!(50), dec!(1500), 6),
];

/// Applied above the last tier.
const TOP_TIER: (Decimal, u32) = (dec!(1500), 6);

/// Reference data describing a class of infraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfractionType {
    pub code: String,
    pub libelle: String,
    pub amende: Money,
    pub points: u32,
    pub categorie: String,
    pub active: bool,
    #[serde(default)]
    pub revision: u64,
}

impl InfractionType {
    pub fn new(
        code: impl Into<String>,
        libelle: impl Into<String>,
        amende: Money,
        points: u32,
        categorie: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            libelle: libelle.into(),
            amende,
            points,
            categorie: categorie.into(),
            active: true,
            revision: 0,
        }
    }
}

/// Measured and authorised speed, in km/h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReading {
    pub retenue: Decimal,
    pub limitee: Decimal,
}

impl SpeedReading {
    pub fn new(retenue: Decimal, limitee: Decimal) -> Self {
        Self { retenue, limitee }
    }

    /// Excess over the limit; must be strictly positive.
    pub fn excess(&self) -> Result<Decimal> {
        let excess = self.retenue - self.limitee;
        if excess > Decimal::ZERO {
            Ok(excess)
        } else {
            Err(LifecycleError::validation(
                "vitesse_retenue must be greater than vitesse_limitee",
            ))
        }
    }
}

/// Result of pricing an infraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fine {
    pub montant: Money,
    pub points: u32,
}

/// Amount and points for a given speed excess, overriding the type's base values.
pub fn speed_tier(excess: Decimal) -> (Money, u32) {
    SPEED_TIERS
        .iter()
        .find(|(bound, _, _)| excess <= *bound)
        .map(|(_, amount, points)| (Money::new(*amount), *points))
        .unwrap_or((Money::new(TOP_TIER.0), TOP_TIER.1))
}

/// Computes the fine for an infraction.
pub fn compute_fine(
    kind: &InfractionType,
    speed: Option<&SpeedReading>,
    flagrant_delit: bool,
) -> Result<Fine> {
    if !kind.active {
        return Err(LifecycleError::validation(format!(
            "infraction type {} is not active",
            kind.code
        )));
    }

    let (montant, points) = match speed {
        Some(reading) => speed_tier(reading.excess()?),
        None => (kind.amende, kind.points),
    };

    let montant = if flagrant_delit {
        montant.scaled(FLAGRANT_DELIT_FACTOR)
    } else {
        montant.rounded()
    };

    Ok(Fine { montant, points })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speeding() -> InfractionType {
        InfractionType::new("VIT-01", "Excès de vitesse", Money::new(dec!(90)), 2, "VITESSE")
    }

    #[test]
    fn test_base_values_without_speed() {
        let fine = compute_fine(&speeding(), None, false).unwrap();
        assert_eq!(fine.montant, Money::new(dec!(90)));
        assert_eq!(fine.points, 2);
    }

    #[test]
    fn test_tier_boundaries() {
        let cases = [
            (dec!(5), dec!(68), 1),
            (dec!(5.01), dec!(135), 1),
            (dec!(10), dec!(135), 1),
            (dec!(20), dec!(135), 2),
            (dec!(30), dec!(135), 3),
            (dec!(40), dec!(135), 4),
            (dec!(40.5), dec!(1500), 6),
            (dec!(50), dec!(1500), 6),
            (dec!(51), dec!(1500), 6),
            (dec!(120), dec!(1500), 6),
        ];
        for (excess, amount, points) in cases {
            assert_eq!(
                speed_tier(excess),
                (Money::new(amount), points),
                "excess {excess}"
            );
        }
    }

    #[test]
    fn test_flagrant_delit_on_speed_tier() {
        let reading = SpeedReading::new(dec!(140), dec!(110));
        let fine = compute_fine(&speeding(), Some(&reading), true).unwrap();
        assert_eq!(fine.montant, Money::new(dec!(202.5)));
        assert_eq!(fine.points, 3);
    }

    #[test]
    fn test_flagrant_delit_on_base_amount() {
        let fine = compute_fine(&speeding(), None, true).unwrap();
        assert_eq!(fine.montant, Money::new(dec!(135)));
    }

    #[test]
    fn test_non_positive_excess_rejected() {
        for (retenue, limitee) in [(dec!(90), dec!(90)), (dec!(80), dec!(90))] {
            let reading = SpeedReading::new(retenue, limitee);
            assert!(matches!(
                compute_fine(&speeding(), Some(&reading), false),
                Err(LifecycleError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_inactive_type_rejected() {
        let mut kind = speeding();
        kind.active = false;
        assert!(matches!(
            compute_fine(&kind, None, false),
            Err(LifecycleError::ValidationError(_))
        ));
    }
}
