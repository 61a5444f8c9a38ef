use pvflow::domain::fine::{FLAGRANT_DELIT_FACTOR, InfractionType, SpeedReading, compute_fine};
use pvflow::domain::money::Money;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn speeding() -> InfractionType {
    InfractionType::new("VIT-01", "Excès de vitesse", Money::new(dec!(90)), 2, "VITESSE")
}

/// Reference pricing of an excess, written out tier by tier.
fn expected(excess: Decimal) -> (Decimal, u32) {
    if excess <= dec!(5) {
        (dec!(68), 1)
    } else if excess <= dec!(10) {
        (dec!(135), 1)
    } else if excess <= dec!(20) {
        (dec!(135), 2)
    } else if excess <= dec!(30) {
        (dec!(135), 3)
    } else if excess <= dec!(40) {
        (dec!(135), 4)
    } else {
        (dec!(1500), 6)
    }
}

#[test]
fn test_random_excess_follows_tiers() {
    let mut rng = rand::thread_rng();
    let kind = speeding();

    for _ in 0..2_000 {
        // Speeds in hundredths of km/h, limit between 30 and 130.
        let limitee = Decimal::from(rng.gen_range(30..=130));
        let excess = Decimal::new(rng.gen_range(1..=9_000), 2);
        let reading = SpeedReading::new(limitee + excess, limitee);

        let (amount, points) = expected(excess);
        let fine = compute_fine(&kind, Some(&reading), false).unwrap();
        assert_eq!(fine.montant, Money::new(amount), "excess {excess}");
        assert_eq!(fine.points, points, "excess {excess}");

        let flagrant = compute_fine(&kind, Some(&reading), true).unwrap();
        assert_eq!(
            flagrant.montant,
            Money::new(amount * FLAGRANT_DELIT_FACTOR).rounded(),
            "excess {excess}"
        );
        assert_eq!(flagrant.points, points);
    }
}

#[test]
fn test_exact_tier_boundaries() {
    let kind = speeding();
    for bound in [5, 10, 20, 30, 40, 50] {
        let bound = Decimal::from(bound);
        for excess in [bound, bound + dec!(0.01)] {
            let reading = SpeedReading::new(dec!(50) + excess, dec!(50));
            let fine = compute_fine(&kind, Some(&reading), false).unwrap();
            let (amount, points) = expected(excess);
            assert_eq!((fine.montant, fine.points), (Money::new(amount), points));
        }
    }
}
