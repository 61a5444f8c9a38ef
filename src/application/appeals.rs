use super::tickets::cascade_cancel;
use crate::domain::appeal::{
    Appeal, AppealFilter, AppealPatch, AppealRuling, AppealStatistics, AppealStatus, NewAppeal,
    WorkflowStage,
};
use crate::domain::clock::Clock;
use crate::domain::ids::{AppealId, NumberKind, TicketId, generate_number};
use crate::domain::ports::{
    AppealStoreRef, ChangeSet, InfractionStoreRef, RecordKey, TicketStoreRef,
};
use crate::domain::ticket::{Decision, Ticket};
use crate::error::{LifecycleError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Appeal (recours) workflow: filing, assignment, decision and abandonment.
///
/// At most one appeal per ticket may be DEPOSE or EN_COURS. The ticket's `active_appeal`
/// marker is written in the same commit as the appeal, so two concurrent filings cannot both
/// succeed.
#[derive(Clone)]
pub struct AppealService {
    appeals: AppealStoreRef,
    tickets: TicketStoreRef,
    infractions: InfractionStoreRef,
    clock: Arc<dyn Clock>,
}

impl AppealService {
    pub fn new(
        appeals: AppealStoreRef,
        tickets: TicketStoreRef,
        infractions: InfractionStoreRef,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            appeals,
            tickets,
            infractions,
            clock,
        }
    }

    pub async fn get(&self, id: AppealId) -> Result<Appeal> {
        self.appeals
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("appeal", id))
    }

    pub async fn get_by_number(&self, numero_recours: &str) -> Result<Appeal> {
        self.appeals
            .get_by_number(numero_recours)
            .await?
            .ok_or_else(|| LifecycleError::not_found("appeal", numero_recours))
    }

    pub async fn list(&self, filter: &AppealFilter) -> Result<Vec<Appeal>> {
        self.appeals.list(filter).await
    }

    pub async fn for_ticket(&self, ticket_id: TicketId) -> Result<Vec<Appeal>> {
        self.appeals.find_by_ticket(ticket_id).await
    }

    /// Appeals still DEPOSE or EN_COURS.
    pub async fn active(&self) -> Result<Vec<Appeal>> {
        let filter = AppealFilter {
            active_only: true,
            ..AppealFilter::default()
        };
        self.appeals.list(&filter).await
    }

    /// Appeals assigned to a handler and awaiting a ruling.
    pub async fn in_progress(&self) -> Result<Vec<Appeal>> {
        let filter = AppealFilter {
            statut: Some(AppealStatus::EnCours),
            ..AppealFilter::default()
        };
        self.appeals.list(&filter).await
    }

    pub async fn statistics(&self, filter: &AppealFilter) -> Result<AppealStatistics> {
        let appeals = self.appeals.list(filter).await?;
        Ok(AppealStatistics::from_records(&appeals))
    }

    pub async fn stages(&self, id: AppealId) -> Result<Vec<WorkflowStage>> {
        let appeal = self.get(id).await?;
        debug!(numero_recours = %appeal.numero_recours, statut = %appeal.statut, "building stages");
        Ok(appeal.stages())
    }

    async fn ticket(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("ticket", id))
    }

    pub async fn file(&self, request: NewAppeal) -> Result<Appeal> {
        let now = self.clock.now();
        let mut ticket = self.ticket(request.ticket_id).await?;
        let appeal = Appeal::file(request, generate_number(NumberKind::Appeal, now), now)?;
        ticket
            .open_appeal(appeal.id, now)
            .inspect_err(|e| warn!(numero_pv = %ticket.numero_pv, error = %e, "appeal refused"))?;

        self.appeals
            .commit(ChangeSet::new().insert(appeal.clone()).update(ticket.clone()))
            .await?;

        info!(
            numero_recours = %appeal.numero_recours,
            numero_pv = %ticket.numero_pv,
            type_recours = %appeal.type_recours,
            "appeal filed"
        );
        self.get(appeal.id).await
    }

    pub async fn assign(&self, id: AppealId, handler: &str) -> Result<Appeal> {
        let now = self.clock.now();
        let mut appeal = self.get(id).await?;
        appeal.assign(handler, now)?;
        self.appeals.update(appeal.clone()).await?;

        info!(numero_recours = %appeal.numero_recours, traite_par = handler, "appeal assigned");
        self.get(id).await
    }

    /// Records the ruling and applies it to the ticket.
    ///
    /// ACCEPTE cancels the ticket whatever its status, along with its open infractions.
    /// Amounts already paid stay on the cancelled ticket and no refund is issued; refunds go
    /// through `PaymentService::refund`.
    /// REFUSE_PARTIEL with a new amount replaces the ticket total.
    pub async fn decide(
        &self,
        id: AppealId,
        ruling: AppealRuling,
        handler: &str,
    ) -> Result<Appeal> {
        let now = self.clock.now();
        let mut appeal = self.get(id).await?;
        let (decision, nouveau_montant) = (ruling.decision, ruling.nouveau_montant);
        appeal.decide(ruling, handler, now)?;

        let mut ticket = self.ticket(appeal.ticket_id).await?;
        ticket
            .apply_appeal_decision(decision, nouveau_montant, now)
            .inspect_err(|e| {
                warn!(numero_recours = %appeal.numero_recours, error = %e, "ruling rejected")
            })?;

        let mut changes = ChangeSet::new();
        if decision == Decision::Accepte {
            if !ticket.montant_paye.is_zero() {
                warn!(
                    numero_pv = %ticket.numero_pv,
                    montant_paye = %ticket.montant_paye,
                    "appeal accepted on a ticket with payments, no refund issued"
                );
            }
            cascade_cancel(self.infractions.as_ref(), &ticket, now, &mut changes).await?;
        }
        self.appeals
            .commit(changes.update(appeal.clone()).update(ticket.clone()))
            .await?;

        info!(
            numero_recours = %appeal.numero_recours,
            decision = %decision,
            numero_pv = %ticket.numero_pv,
            ticket_statut = %ticket.statut,
            "appeal decided"
        );
        self.get(id).await
    }

    pub async fn abandon(&self, id: AppealId, motif: &str) -> Result<Appeal> {
        let now = self.clock.now();
        let mut appeal = self.get(id).await?;
        appeal.abandon(motif, now)?;
        self.release(appeal.clone(), None, now).await?;

        info!(numero_recours = %appeal.numero_recours, "appeal abandoned");
        self.get(id).await
    }

    pub async fn update(&self, id: AppealId, patch: AppealPatch) -> Result<Appeal> {
        let now = self.clock.now();
        let mut appeal = self.get(id).await?;
        appeal.apply_patch(patch, now)?;
        self.appeals.update(appeal).await?;
        self.get(id).await
    }

    pub async fn delete(&self, id: AppealId) -> Result<()> {
        let now = self.clock.now();
        let appeal = self.get(id).await?;
        appeal.ensure_deletable()?;
        let numero = appeal.numero_recours.clone();
        let delete = (RecordKey::Appeal(id), appeal.revision);
        self.release(appeal, Some(delete), now).await?;

        info!(numero_recours = %numero, "appeal deleted");
        Ok(())
    }

    /// Writes `appeal` (or deletes it) and frees the ticket's active-appeal marker.
    async fn release(
        &self,
        appeal: Appeal,
        delete: Option<(RecordKey, u64)>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let mut ticket = self.ticket(appeal.ticket_id).await?;
        ticket.release_appeal(appeal.id, now);
        let changes = match delete {
            Some((key, revision)) => ChangeSet::new().delete(key, revision),
            None => ChangeSet::new().update(appeal),
        };
        self.appeals.commit(changes.update(ticket)).await
    }
}
