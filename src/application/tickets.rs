//! Ticket (PV) lifecycle manager.
//!
//! Turns infractions into payable tickets and drives every ticket transition. Writes that touch
//! linked infractions or payments are committed in a single [`ChangeSet`].

use crate::domain::appeal::Appeal;
use crate::domain::clock::Clock;
use crate::domain::ids::{InfractionId, NumberKind, TicketId, generate_number};
use crate::domain::infraction::{Infraction, InfractionAction, InfractionStatus};
use crate::domain::money::{Amount, Money};
use crate::domain::payment::{NewPayment, Payment, PaymentMethod};
use crate::domain::ports::{
    AppealStoreRef, Change, ChangeSet, InfractionStore, InfractionStoreRef, PaymentStoreRef, RecordKey,
    TicketStoreRef,
};
use crate::domain::ticket::{
    Decision, NewTicket, Reminder, Ticket, TicketAction, TicketFilter, TicketPatch,
    TicketStatistics,
};
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A ticket with everything that hangs off it, plus its derived amounts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketAggregate {
    pub ticket: Ticket,
    pub infractions: Vec<Infraction>,
    pub payments: Vec<Payment>,
    pub appeals: Vec<Appeal>,
    pub montant_du: Money,
    pub montant_restant: Money,
    pub est_expire: bool,
}

pub(crate) async fn load_infractions(
    store: &dyn InfractionStore,
    ids: &[InfractionId],
) -> Result<Vec<Infraction>> {
    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        let infraction = store
            .get(*id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("infraction", id))?;
        found.push(infraction);
    }
    Ok(found)
}

/// Applies `amount` to `ticket`; once it is settled every linked infraction is marked paid.
///
/// The caller commits `changes` together with the updated ticket.
pub(crate) async fn settle(
    store: &dyn InfractionStore,
    ticket: &mut Ticket,
    amount: Amount,
    now: DateTime<Utc>,
    changes: &mut ChangeSet,
) -> Result<bool> {
    let settled = ticket.apply_payment(amount, now)?;
    if settled {
        for mut infraction in load_infractions(store, &ticket.infraction_ids).await? {
            infraction.transition(InfractionAction::RecordPayment, now)?;
            changes.push(Change::Update(infraction.into()));
        }
    }
    Ok(settled)
}

/// Cancels the linked infractions still open for cancellation; paid or archived ones are kept.
pub(crate) async fn cascade_cancel(
    store: &dyn InfractionStore,
    ticket: &Ticket,
    now: DateTime<Utc>,
    changes: &mut ChangeSet,
) -> Result<()> {
    for mut infraction in load_infractions(store, &ticket.infraction_ids).await? {
        if matches!(
            infraction.statut,
            InfractionStatus::Constatee | InfractionStatus::Validee | InfractionStatus::Contestee
        ) {
            infraction.transition(InfractionAction::Cancel, now)?;
            changes.push(Change::Update(infraction.into()));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct TicketService {
    tickets: TicketStoreRef,
    infractions: InfractionStoreRef,
    payments: PaymentStoreRef,
    appeals: AppealStoreRef,
    clock: Arc<dyn Clock>,
    default_due_days: i64,
}

impl TicketService {
    pub fn new(
        tickets: TicketStoreRef,
        infractions: InfractionStoreRef,
        payments: PaymentStoreRef,
        appeals: AppealStoreRef,
        clock: Arc<dyn Clock>,
        default_due_days: i64,
    ) -> Self {
        Self {
            tickets,
            infractions,
            payments,
            appeals,
            clock,
            default_due_days,
        }
    }

    pub async fn get(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("ticket", id))
    }

    pub async fn get_by_number(&self, numero_pv: &str) -> Result<Ticket> {
        self.tickets
            .get_by_number(numero_pv)
            .await?
            .ok_or_else(|| LifecycleError::not_found("ticket", numero_pv))
    }

    pub async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        self.tickets.list(filter).await
    }

    /// Tickets past their due date that are neither paid nor cancelled.
    pub async fn expired(&self) -> Result<Vec<Ticket>> {
        let filter = TicketFilter {
            expired_as_of: Some(self.clock.now()),
            ..TicketFilter::default()
        };
        self.tickets.list(&filter).await
    }

    pub async fn statistics(&self, filter: &TicketFilter) -> Result<TicketStatistics> {
        let tickets = self.tickets.list(filter).await?;
        Ok(TicketStatistics::from_records(&tickets, self.clock.now()))
    }

    pub async fn load(&self, id: TicketId) -> Result<TicketAggregate> {
        let ticket = self.get(id).await?;
        let now = self.clock.now();
        debug!(numero_pv = %ticket.numero_pv, "loading ticket aggregate");

        Ok(TicketAggregate {
            infractions: load_infractions(self.infractions.as_ref(), &ticket.infraction_ids)
                .await?,
            payments: self.payments.find_by_ticket(id).await?,
            appeals: self.appeals.find_by_ticket(id).await?,
            montant_du: ticket.amount_due(now),
            montant_restant: ticket.remaining(now),
            est_expire: ticket.is_expired(now),
            ticket,
        })
    }

    /// Issues a ticket over existing, unlinked infractions and links them atomically.
    pub async fn issue(&self, request: NewTicket) -> Result<Ticket> {
        let now = self.clock.now();
        let numero_pv = generate_number(NumberKind::Ticket, now);
        let infractions =
            load_infractions(self.infractions.as_ref(), &request.infraction_ids).await?;
        let ticket = Ticket::issue(request, numero_pv, self.default_due_days, now)?;

        let mut changes = ChangeSet::new();
        for mut infraction in infractions {
            infraction
                .link_ticket(ticket.id, &ticket.numero_pv, now)
                .inspect_err(|e| warn!(infraction = %infraction.id, error = %e, "link rejected"))?;
            changes = changes.update(infraction);
        }
        self.tickets.commit(changes.insert(ticket.clone())).await?;

        info!(
            numero_pv = %ticket.numero_pv,
            montant = %ticket.montant_total,
            infractions = ticket.infraction_ids.len(),
            "ticket issued"
        );
        self.get(ticket.id).await
    }

    /// Issues a ticket for a single infraction, billed at the infraction's fine.
    pub async fn generate_for_infraction(&self, infraction_id: InfractionId) -> Result<Ticket> {
        let infraction = self
            .infractions
            .get(infraction_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("infraction", infraction_id))?;
        self.issue(NewTicket {
            infraction_ids: vec![infraction_id],
            montant_total: infraction.montant_amende,
            date_limite_paiement: None,
            observations: None,
        })
        .await
    }

    /// Pays `amount` directly at the counter: records an already validated payment.
    pub async fn pay(&self, id: TicketId, amount: Amount, moyen: PaymentMethod) -> Result<Payment> {
        let now = self.clock.now();
        let amount = amount.rounded()?;
        let mut ticket = self.get(id).await?;
        Self::ensure_payable(&ticket, amount, now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "payment refused"))?;
        let numero = generate_number(NumberKind::Transaction, now);
        let mut payment = Payment::open(
            NewPayment {
                ticket_id: id,
                montant: amount,
                moyen,
                reference_externe: None,
                details: None,
            },
            numero.clone(),
            now,
        );
        payment.validate(&numero, now)?;

        let mut changes = ChangeSet::new();
        let settled = settle(self.infractions.as_ref(), &mut ticket, amount, now, &mut changes)
            .await
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "payment rejected"))?;
        self.tickets
            .commit(changes.update(ticket.clone()).insert(payment.clone()))
            .await?;

        info!(
            numero_pv = %ticket.numero_pv,
            numero_transaction = %payment.numero_transaction,
            montant = %payment.montant,
            settled,
            "ticket payment recorded"
        );
        Ok(payment)
    }

    async fn save(&self, ticket: Ticket, changes: ChangeSet, event: &str) -> Result<Ticket> {
        self.tickets.commit(changes.update(ticket.clone())).await?;
        info!(numero_pv = %ticket.numero_pv, statut = %ticket.statut, "{event}");
        self.get(ticket.id).await
    }

    pub async fn majorer(
        &self,
        id: TicketId,
        montant_majore: Amount,
        date_majoration: Option<DateTime<Utc>>,
    ) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket
            .majorer(montant_majore, date_majoration.unwrap_or(now), now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "majoration rejected"))?;
        self.save(ticket, ChangeSet::new(), "ticket majorated").await
    }

    pub async fn mark_late(&self, id: TicketId) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket.mark_late(now)?;
        self.save(ticket, ChangeSet::new(), "ticket marked late").await
    }

    pub async fn contest(
        &self,
        id: TicketId,
        motif: &str,
        tribunal: Option<String>,
    ) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket.contest(motif, tribunal, now)?;
        self.save(ticket, ChangeSet::new(), "ticket contested").await
    }

    pub async fn decide_contestation(
        &self,
        id: TicketId,
        decision: Decision,
        motif: &str,
        nouveau_montant: Option<Amount>,
    ) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket
            .decide_contestation(decision, motif, nouveau_montant, now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "decision rejected"))?;

        let mut changes = ChangeSet::new();
        if decision == Decision::Accepte {
            cascade_cancel(self.infractions.as_ref(), &ticket, now, &mut changes).await?;
        }
        self.save(ticket, changes, "contestation decided").await
    }

    pub async fn cancel(&self, id: TicketId, motif: &str) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket
            .cancel(motif, now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "cancellation rejected"))?;

        let mut changes = ChangeSet::new();
        cascade_cancel(self.infractions.as_ref(), &ticket, now, &mut changes).await?;
        self.save(ticket, changes, "ticket cancelled").await
    }

    pub async fn update(&self, id: TicketId, patch: TicketPatch) -> Result<Ticket> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        ticket.apply_patch(patch, now)?;
        self.save(ticket, ChangeSet::new(), "ticket updated").await
    }

    pub async fn remind(&self, id: TicketId) -> Result<Reminder> {
        let now = self.clock.now();
        let mut ticket = self.get(id).await?;
        let reminder = ticket.remind(now)?;
        self.tickets.commit(ChangeSet::new().update(ticket)).await?;

        info!(
            numero_pv = %reminder.numero_pv,
            rappel = reminder.numero_rappel,
            montant_du = %reminder.montant_du,
            "payment reminder sent"
        );
        Ok(reminder)
    }

    /// Deletes an unpaid ticket nothing else refers to, releasing its infractions.
    pub async fn delete(&self, id: TicketId) -> Result<()> {
        let now = self.clock.now();
        let ticket = self.get(id).await?;
        ticket.ensure_deletable()?;

        let payments = self.payments.find_by_ticket(id).await?;
        let appeals = self.appeals.find_by_ticket(id).await?;
        if !payments.is_empty() || !appeals.is_empty() {
            return Err(LifecycleError::validation(format!(
                "ticket {} is referenced by {} payment(s) and {} appeal(s)",
                ticket.numero_pv,
                payments.len(),
                appeals.len()
            )));
        }

        let mut changes = ChangeSet::new();
        for mut infraction in
            load_infractions(self.infractions.as_ref(), &ticket.infraction_ids).await?
        {
            infraction.unlink_ticket(now);
            changes = changes.update(infraction);
        }
        self.tickets
            .commit(changes.delete(RecordKey::Ticket(id), ticket.revision))
            .await?;

        info!(numero_pv = %ticket.numero_pv, "ticket deleted");
        Ok(())
    }

    /// Checks that a payment of `amount` could be taken right now.
    pub(crate) fn ensure_payable(ticket: &Ticket, amount: Amount, now: DateTime<Utc>) -> Result<()> {
        ticket.statut.apply(TicketAction::Pay { settles: false })?;
        let remaining = ticket.remaining(now);
        if Money::from(amount) > remaining {
            return Err(LifecycleError::AmountMismatch(format!(
                "payment of {} exceeds remaining amount {remaining} on ticket {}",
                Money::from(amount),
                ticket.numero_pv
            )));
        }
        Ok(())
    }
}
