use super::appeals::AppealService;
use super::infractions::InfractionService;
use super::payments::PaymentService;
use super::tickets::TicketService;
use crate::config::EngineConfig;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::ports::{
    AppealStoreRef, Backend, InfractionStoreRef, InfractionTypeStoreRef, PaymentStoreRef,
    TicketStoreRef,
};
use crate::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;

/// The entry point of the lifecycle engine.
///
/// `TrafficEngine` wires the four services over a single storage backend, so that every
/// cross-entity change set is committed by the same store.
#[derive(Clone)]
pub struct TrafficEngine {
    pub infractions: InfractionService,
    pub tickets: TicketService,
    pub payments: PaymentService,
    pub appeals: AppealService,
    clock: Arc<dyn Clock>,
}

impl TrafficEngine {
    /// Creates an engine over `backend`.
    ///
    /// # Arguments
    ///
    /// * `backend` - Storage implementing every store port.
    /// * `clock` - Source of the current instant for due dates, majoration and expiry.
    /// * `config` - Engine settings (default due delay).
    pub fn new<B>(backend: B, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self
    where
        B: Backend + 'static,
    {
        let backend = Arc::new(backend);
        let types: InfractionTypeStoreRef = backend.clone();
        let infractions: InfractionStoreRef = backend.clone();
        let tickets: TicketStoreRef = backend.clone();
        let payments: PaymentStoreRef = backend.clone();
        let appeals: AppealStoreRef = backend;

        Self {
            infractions: InfractionService::new(types, infractions.clone(), clock.clone()),
            tickets: TicketService::new(
                tickets.clone(),
                infractions.clone(),
                payments.clone(),
                appeals.clone(),
                clock.clone(),
                config.default_due_days,
            ),
            payments: PaymentService::new(
                payments,
                tickets.clone(),
                infractions.clone(),
                clock.clone(),
            ),
            appeals: AppealService::new(appeals, tickets, infractions, clock.clone()),
            clock,
        }
    }

    /// An engine over a fresh in-memory store and the system clock.
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::new(InMemoryStore::new(), Arc::new(SystemClock), config)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedClock;
    use crate::domain::fine::InfractionType;
    use crate::domain::infraction::NewInfraction;
    use crate::domain::money::Money;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_services_share_one_backend() {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 8, 30, 0).unwrap();
        let config = EngineConfig {
            default_due_days: 30,
            ..EngineConfig::default()
        };
        let engine = TrafficEngine::new(
            InMemoryStore::new(),
            Arc::new(FixedClock::new(start)),
            &config,
        );

        engine
            .infractions
            .register_type(InfractionType::new(
                "FEU-01",
                "Franchissement de feu rouge",
                Money::new(dec!(135)),
                4,
                "SIGNALISATION",
            ))
            .await
            .unwrap();
        let infraction = engine
            .infractions
            .record(NewInfraction::new("FEU-01", "Carrefour central", start))
            .await
            .unwrap();
        let ticket = engine
            .tickets
            .generate_for_infraction(infraction.id)
            .await
            .unwrap();

        assert_eq!(ticket.date_limite_paiement, start + Duration::days(30));
        assert!(engine.payments.for_ticket(ticket.id).await.unwrap().is_empty());
        assert!(engine.appeals.for_ticket(ticket.id).await.unwrap().is_empty());
        assert_eq!(
            engine.infractions.get(infraction.id).await.unwrap().numero_pv,
            Some(ticket.numero_pv)
        );
    }
}
