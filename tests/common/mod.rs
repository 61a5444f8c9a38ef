#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use pvflow::application::engine::TrafficEngine;
use pvflow::config::EngineConfig;
use pvflow::domain::clock::FixedClock;
use pvflow::domain::fine::{InfractionType, SpeedReading};
use pvflow::domain::infraction::{Infraction, NewInfraction};
use pvflow::domain::money::Money;
use pvflow::domain::ticket::{NewTicket, Ticket};
use pvflow::infrastructure::in_memory::InMemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const JOURNAL_HEADER: &str = "op,ref,target,amount,points,measured,limit,flag,text";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
}

/// An in-memory engine driven by a clock the test controls.
pub fn engine() -> (TrafficEngine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(start()));
    let engine = TrafficEngine::new(
        InMemoryStore::new(),
        clock.clone(),
        &EngineConfig::default(),
    );
    (engine, clock)
}

/// Registers `VIT-01` (90, 2 points) and `STA-01` (35, no points).
pub async fn register_types(engine: &TrafficEngine) {
    engine
        .infractions
        .register_type(InfractionType::new(
            "VIT-01",
            "Excès de vitesse",
            Money::new(dec!(90)),
            2,
            "VITESSE",
        ))
        .await
        .unwrap();
    engine
        .infractions
        .register_type(InfractionType::new(
            "STA-01",
            "Stationnement gênant",
            Money::new(dec!(35)),
            0,
            "STATIONNEMENT",
        ))
        .await
        .unwrap();
}

pub async fn speeding(
    engine: &TrafficEngine,
    retenue: Decimal,
    limitee: Decimal,
    flagrant: bool,
) -> Infraction {
    let mut draft = NewInfraction::new("VIT-01", "RN1 PK 12", start())
        .with_speed(SpeedReading::new(retenue, limitee));
    if flagrant {
        draft = draft.flagrant();
    }
    engine.infractions.record(draft).await.unwrap()
}

pub async fn parking(engine: &TrafficEngine) -> Infraction {
    engine
        .infractions
        .record(NewInfraction::new("STA-01", "Avenue de la Paix", start()))
        .await
        .unwrap()
}

/// A ticket of `total` over a single fresh parking infraction.
pub async fn ticket_of(engine: &TrafficEngine, total: Decimal) -> Ticket {
    let infraction = parking(engine).await;
    engine
        .tickets
        .issue(NewTicket {
            infraction_ids: vec![infraction.id],
            montant_total: Money::new(total),
            date_limite_paiement: None,
            observations: None,
        })
        .await
        .unwrap()
}

/// Writes a journal with the standard header followed by `lines`.
pub fn journal(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{JOURNAL_HEADER}").unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
