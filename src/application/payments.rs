use super::tickets::{TicketService, settle};
use crate::domain::clock::Clock;
use crate::domain::ids::{NumberKind, PaymentId, TicketId, generate_number};
use crate::domain::money::Amount;
use crate::domain::payment::{
    NewPayment, Payment, PaymentFilter, PaymentPatch, PaymentStatistics, TreasuryReceipt,
    TreasuryStamp,
};
use crate::domain::ports::{
    ChangeSet, InfractionStoreRef, PaymentStoreRef, RecordKey, TicketStoreRef,
};
use crate::domain::ticket::Ticket;
use crate::error::{LifecycleError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Drives single payment attempts against a ticket, including the treasury-receipt flow.
#[derive(Clone)]
pub struct PaymentService {
    payments: PaymentStoreRef,
    tickets: TicketStoreRef,
    infractions: InfractionStoreRef,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(
        payments: PaymentStoreRef,
        tickets: TicketStoreRef,
        infractions: InfractionStoreRef,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            tickets,
            infractions,
            clock,
        }
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("payment", id))
    }

    pub async fn get_by_number(&self, numero_transaction: &str) -> Result<Payment> {
        self.payments
            .get_by_number(numero_transaction)
            .await?
            .ok_or_else(|| LifecycleError::not_found("payment", numero_transaction))
    }

    pub async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        self.payments.list(filter).await
    }

    pub async fn for_ticket(&self, ticket_id: TicketId) -> Result<Vec<Payment>> {
        self.payments.find_by_ticket(ticket_id).await
    }

    pub async fn statistics(&self, filter: &PaymentFilter) -> Result<PaymentStatistics> {
        let payments = self.payments.list(filter).await?;
        Ok(PaymentStatistics::from_records(&payments))
    }

    async fn ticket(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("ticket", id))
    }

    /// Opens a pending payment. The ticket must be payable and the amount within what remains.
    pub async fn create(&self, request: NewPayment) -> Result<Payment> {
        let now = self.clock.now();
        let request = NewPayment {
            montant: request.montant.rounded()?,
            ..request
        };
        let ticket = self.ticket(request.ticket_id).await?;
        TicketService::ensure_payable(&ticket, request.montant, now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "payment refused"))?;

        let payment = Payment::open(request, generate_number(NumberKind::Transaction, now), now);
        self.payments.create(payment.clone()).await?;

        info!(
            numero_transaction = %payment.numero_transaction,
            numero_pv = %ticket.numero_pv,
            montant = %payment.montant,
            moyen = %payment.moyen,
            "payment opened"
        );
        self.get(payment.id).await
    }

    /// Validates a pending payment and applies it to its ticket in the same commit.
    pub async fn validate(&self, id: PaymentId, code_autorisation: &str) -> Result<Payment> {
        let now = self.clock.now();
        let mut payment = self.get(id).await?;
        payment.validate(code_autorisation, now)?;
        self.apply_to_ticket(payment, ChangeSet::new(), "payment validated")
            .await
    }

    async fn apply_to_ticket(
        &self,
        payment: Payment,
        mut changes: ChangeSet,
        event: &str,
    ) -> Result<Payment> {
        let now = self.clock.now();
        let mut ticket = self.ticket(payment.ticket_id).await?;
        let settled = settle(
            self.infractions.as_ref(),
            &mut ticket,
            payment.amount()?,
            now,
            &mut changes,
        )
        .await
        .inspect_err(|e| {
            warn!(numero_transaction = %payment.numero_transaction, error = %e, "cannot apply payment")
        })?;

        self.payments
            .commit(changes.update(ticket.clone()).update(payment.clone()))
            .await?;

        info!(
            numero_transaction = %payment.numero_transaction,
            numero_pv = %ticket.numero_pv,
            ticket_statut = %ticket.statut,
            settled,
            "{event}"
        );
        self.get(payment.id).await
    }

    pub async fn refuse(&self, id: PaymentId, motif: &str) -> Result<Payment> {
        let now = self.clock.now();
        let mut payment = self.get(id).await?;
        payment.refuse(motif, now)?;
        self.payments.update(payment.clone()).await?;

        info!(numero_transaction = %payment.numero_transaction, "payment refused");
        self.get(id).await
    }

    /// Refunds a validated payment, fully or partially.
    ///
    /// The refund is taken off an open ticket's paid amount; a paid ticket cannot be refunded
    /// and a cancelled one is left as it is.
    pub async fn refund(
        &self,
        id: PaymentId,
        amount: Option<Amount>,
        note: Option<String>,
    ) -> Result<Payment> {
        let now = self.clock.now();
        let amount = amount.map(Amount::rounded).transpose()?;
        let mut payment = self.get(id).await?;
        let refunded = payment.refund(amount, note, now)?;

        let mut ticket = self.ticket(payment.ticket_id).await?;
        let before = ticket.clone();
        ticket.revert_payment(refunded, now).inspect_err(|e| {
            warn!(numero_transaction = %payment.numero_transaction, error = %e, "refund rejected")
        })?;

        let mut changes = ChangeSet::new().update(payment.clone());
        if ticket != before {
            changes = changes.update(ticket);
        }
        self.payments.commit(changes).await?;

        info!(
            numero_transaction = %payment.numero_transaction,
            montant_rembourse = %refunded,
            "payment refunded"
        );
        self.get(id).await
    }

    pub async fn update(&self, id: PaymentId, patch: PaymentPatch) -> Result<Payment> {
        let now = self.clock.now();
        let mut payment = self.get(id).await?;
        payment.apply_patch(patch, now)?;
        self.payments.update(payment).await?;
        self.get(id).await
    }

    pub async fn delete(&self, id: PaymentId) -> Result<()> {
        let payment = self.get(id).await?;
        payment.ensure_deletable()?;
        self.payments
            .commit(ChangeSet::new().delete(RecordKey::Payment(id), payment.revision))
            .await?;

        info!(numero_transaction = %payment.numero_transaction, "payment deleted");
        Ok(())
    }

    /// Stamps a TRESOR_PUBLIC payment with a treasury receipt, validating it if still pending.
    pub async fn generate_treasury_receipt(
        &self,
        id: PaymentId,
        agent: &str,
        bureau: &str,
    ) -> Result<TreasuryReceipt> {
        let now = self.clock.now();
        let mut payment = self.get(id).await?;
        let stamp = TreasuryStamp {
            numero_recu: generate_number(NumberKind::TreasuryReceipt, now),
            agent: agent.to_string(),
            bureau: bureau.to_string(),
        };
        let validated = payment.stamp_treasury(stamp, now)?;

        let payment = if validated {
            self.apply_to_ticket(payment, ChangeSet::new(), "treasury payment validated")
                .await?
        } else {
            self.payments.update(payment).await?;
            self.get(id).await?
        };

        let receipt = TreasuryReceipt::for_payment(&payment, &self.ticket(payment.ticket_id).await?)?;
        info!(
            numero_recu = %receipt.numero_recu,
            numero_transaction = %receipt.numero_transaction,
            "treasury receipt issued"
        );
        Ok(receipt)
    }

    pub async fn treasury_receipt(&self, id: PaymentId) -> Result<TreasuryReceipt> {
        let payment = self.get(id).await?;
        let ticket = self.ticket(payment.ticket_id).await?;
        TreasuryReceipt::for_payment(&payment, &ticket)
    }
}
