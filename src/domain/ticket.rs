//! Ticket (procès-verbal) aggregate root and its status machine.

use super::ids::{AppealId, InfractionId, TicketId};
use super::money::{Amount, Money};
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Emis,
    Paye,
    Majore,
    Conteste,
    Annule,
    EnRetard,
}

/// Outcome of a contestation or appeal examination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accepte,
    RefusePartiel,
    RefuseTotal,
}

impl Decision {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accepte => "ACCEPTE",
            Self::RefusePartiel => "REFUSE_PARTIEL",
            Self::RefuseTotal => "REFUSE_TOTAL",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Decision {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACCEPTE" => Ok(Self::Accepte),
            "REFUSE_PARTIEL" => Ok(Self::RefusePartiel),
            "REFUSE_TOTAL" => Ok(Self::RefuseTotal),
            other => Err(LifecycleError::validation(format!("invalid decision: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    Pay { settles: bool },
    Majorer,
    MarkLate,
    Contest,
    DecideContestation(Decision),
    Cancel,
    AppealAccepted,
    AppealAmended,
    /// Edits that keep the status (update, reminder, appeal filing).
    Amend,
    Delete,
}

impl TicketAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pay { .. } => "pay",
            Self::Majorer => "apply a late penalty to",
            Self::MarkLate => "mark late",
            Self::Contest => "contest",
            Self::DecideContestation(_) => "decide the contestation of",
            Self::Cancel => "cancel",
            Self::AppealAccepted | Self::AppealAmended => "apply an appeal decision to",
            Self::Amend => "amend",
            Self::Delete => "delete",
        }
    }
}

impl TicketStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Emis => "EMIS",
            Self::Paye => "PAYE",
            Self::Majore => "MAJORE",
            Self::Conteste => "CONTESTE",
            Self::Annule => "ANNULE",
            Self::EnRetard => "EN_RETARD",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paye | Self::Annule)
    }

    pub fn apply(self, action: TicketAction) -> Result<Self> {
        use TicketAction as A;
        use TicketStatus::*;

        match (self, action) {
            (Paye, A::Pay { .. }) => Err(LifecycleError::AlreadyProcessed(
                "ticket already paid".into(),
            )),
            (Annule, A::Cancel) => Err(LifecycleError::AlreadyProcessed(
                "ticket already cancelled".into(),
            )),
            (EnRetard, A::MarkLate) => Err(LifecycleError::AlreadyProcessed(
                "ticket already marked late".into(),
            )),
            (Conteste, A::Contest) => Err(LifecycleError::AlreadyProcessed(
                "ticket already contested".into(),
            )),
            (_, A::AppealAccepted) => Ok(Annule),
            (Paye, A::Delete) => Err(LifecycleError::invalid_transition(
                "ticket",
                self,
                action.label(),
            )),
            (_, A::Delete) => Ok(self),
            (Conteste, A::DecideContestation(Decision::Accepte)) => Ok(Annule),
            (Conteste, A::DecideContestation(_)) => Ok(Emis),
            (from, _) if from.is_terminal() => Err(LifecycleError::invalid_transition(
                "ticket",
                from,
                action.label(),
            )),
            (from, A::Pay { settles }) => Ok(if settles { Paye } else { from }),
            (_, A::Majorer) => Ok(Majore),
            (_, A::MarkLate) => Ok(EnRetard),
            (_, A::Contest) => Ok(Conteste),
            (_, A::Cancel) => Ok(Annule),
            (_, A::AppealAmended) => Ok(Emis),
            (from, A::Amend) => Ok(from),
            (from, A::DecideContestation(_)) => Err(LifecycleError::invalid_transition(
                "ticket",
                from,
                action.label(),
            )),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Request to issue a ticket over a set of infractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub infraction_ids: Vec<InfractionId>,
    pub montant_total: Money,
    pub date_limite_paiement: Option<DateTime<Utc>>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPatch {
    pub montant_total: Option<Amount>,
    pub date_limite_paiement: Option<DateTime<Utc>>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub numero_pv: String,
    pub date_emission: DateTime<Utc>,
    pub montant_total: Money,
    pub montant_majore: Option<Money>,
    pub date_majoration: Option<DateTime<Utc>>,
    pub date_limite_paiement: DateTime<Utc>,
    pub statut: TicketStatus,
    pub montant_paye: Money,
    pub date_paiement: Option<DateTime<Utc>>,
    pub infraction_ids: Vec<InfractionId>,
    pub date_contestation: Option<DateTime<Utc>>,
    pub motif_contestation: Option<String>,
    pub tribunal_competent: Option<String>,
    pub decision_contestation: Option<String>,
    pub motif_annulation: Option<String>,
    pub observations: Option<String>,
    pub rappels: u32,
    /// Set while an appeal is DEPOSE or EN_COURS.
    pub active_appeal: Option<AppealId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

/// A payment reminder sent for an unpaid ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub ticket_id: TicketId,
    pub numero_pv: String,
    pub date_rappel: DateTime<Utc>,
    pub numero_rappel: u32,
    pub montant_du: Money,
    pub date_limite: DateTime<Utc>,
}

impl Ticket {
    pub fn issue(
        request: NewTicket,
        numero_pv: String,
        default_due_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if request.infraction_ids.is_empty() {
            return Err(LifecycleError::validation(
                "at least one infraction_id is required",
            ));
        }
        let distinct: HashSet<_> = request.infraction_ids.iter().collect();
        if distinct.len() != request.infraction_ids.len() {
            return Err(LifecycleError::validation("duplicate infraction_id"));
        }
        if request.montant_total.value() <= Decimal::ZERO {
            return Err(LifecycleError::validation("montant_total must be positive"));
        }

        let due = match request.date_limite_paiement {
            Some(due) => due,
            None => Duration::try_days(default_due_days)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| {
                    LifecycleError::validation(format!(
                        "payment delay of {default_due_days} days is out of range"
                    ))
                })?,
        };

        Ok(Self {
            id: TicketId::new(),
            numero_pv,
            date_emission: now,
            montant_total: request.montant_total.rounded(),
            montant_majore: None,
            date_majoration: None,
            date_limite_paiement: due,
            statut: TicketStatus::Emis,
            montant_paye: Money::ZERO,
            date_paiement: None,
            infraction_ids: request.infraction_ids,
            date_contestation: None,
            motif_contestation: None,
            tribunal_competent: None,
            decision_contestation: None,
            motif_annulation: None,
            observations: request.observations,
            rappels: 0,
            active_appeal: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    /// The majorated amount once its effective date has passed, else the base total.
    pub fn amount_due(&self, now: DateTime<Utc>) -> Money {
        match (self.montant_majore, self.date_majoration) {
            (Some(majore), Some(from)) if from <= now => majore,
            _ => self.montant_total,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Money {
        self.amount_due(now).saturating_sub(self.montant_paye)
    }

    /// Past the due date and neither paid nor cancelled. Derived, never stored.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.date_limite_paiement < now && !self.statut.is_terminal()
    }

    fn step(&mut self, action: TicketAction, now: DateTime<Utc>) -> Result<TicketStatus> {
        let previous = self.statut;
        self.statut = previous.apply(action)?;
        self.updated_at = now;
        Ok(previous)
    }

    /// Records `amount` against the ticket. Returns `true` when the ticket became PAYE.
    pub fn apply_payment(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<bool> {
        let amount = amount.rounded()?;
        let due = self.amount_due(now);
        let paid = self.montant_paye + amount.into();
        if paid > due {
            return Err(LifecycleError::AmountMismatch(format!(
                "payment of {} exceeds remaining amount {} on ticket {}",
                Money::from(amount),
                self.remaining(now),
                self.numero_pv
            )));
        }
        let settles = paid >= due;
        self.step(TicketAction::Pay { settles }, now)?;
        self.montant_paye = paid;
        self.date_paiement = Some(now);
        Ok(settles)
    }

    /// Takes a refunded amount back out of the cumulative paid amount of an open ticket.
    pub fn revert_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        match self.statut {
            TicketStatus::Paye => Err(LifecycleError::invalid_transition(
                "ticket",
                self.statut,
                "refund a payment of",
            )),
            TicketStatus::Annule => Ok(()),
            _ => {
                self.montant_paye = self.montant_paye.saturating_sub(amount);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    pub fn majorer(
        &mut self,
        montant_majore: Amount,
        date_majoration: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let majore = Money::from(montant_majore).rounded();
        if majore <= self.montant_total {
            return Err(LifecycleError::validation(format!(
                "montant_majore {majore} must exceed montant_total {}",
                self.montant_total
            )));
        }
        self.step(TicketAction::Majorer, now)?;
        self.montant_majore = Some(majore);
        self.date_majoration = Some(date_majoration);
        Ok(())
    }

    pub fn mark_late(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.step(TicketAction::MarkLate, now).map(|_| ())
    }

    pub fn contest(
        &mut self,
        motif: &str,
        tribunal: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        require_text(motif, "motif_contestation")?;
        self.step(TicketAction::Contest, now)?;
        self.date_contestation = Some(now);
        self.motif_contestation = Some(motif.to_string());
        self.tribunal_competent = tribunal;
        Ok(())
    }

    pub fn decide_contestation(
        &mut self,
        decision: Decision,
        motif: &str,
        nouveau_montant: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        require_text(motif, "motif")?;
        let mut next = self.clone();
        next.step(TicketAction::DecideContestation(decision), now)?;
        if decision == Decision::RefusePartiel
            && let Some(amount) = nouveau_montant
        {
            next.replace_total(amount)?;
        }
        next.decision_contestation = Some(motif.to_string());
        *self = next;
        Ok(())
    }

    pub fn cancel(&mut self, motif: &str, now: DateTime<Utc>) -> Result<()> {
        require_text(motif, "motif")?;
        self.step(TicketAction::Cancel, now)?;
        self.motif_annulation = Some(motif.to_string());
        Ok(())
    }

    /// Effect of a decided appeal on the ticket it targets.
    pub fn apply_appeal_decision(
        &mut self,
        decision: Decision,
        nouveau_montant: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut next = self.clone();
        match (decision, nouveau_montant) {
            (Decision::Accepte, _) => {
                next.step(TicketAction::AppealAccepted, now)?;
            }
            (Decision::RefusePartiel, Some(amount)) => {
                next.step(TicketAction::AppealAmended, now)?;
                next.replace_total(amount)?;
            }
            _ => {}
        }
        next.active_appeal = None;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    fn replace_total(&mut self, amount: Amount) -> Result<()> {
        let total = Money::from(amount).rounded();
        if total <= self.montant_paye {
            return Err(LifecycleError::AmountMismatch(format!(
                "new amount {total} does not exceed the {} already paid",
                self.montant_paye
            )));
        }
        self.montant_total = total;
        self.montant_majore = None;
        self.date_majoration = None;
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: TicketPatch, now: DateTime<Utc>) -> Result<()> {
        let mut next = self.clone();
        next.step(TicketAction::Amend, now)?;
        if let Some(amount) = patch.montant_total {
            let total = Money::from(amount).rounded();
            if total < next.montant_paye {
                return Err(LifecycleError::AmountMismatch(format!(
                    "montant_total {total} is below the {} already paid",
                    next.montant_paye
                )));
            }
            next.montant_total = total;
        }
        if let Some(due) = patch.date_limite_paiement {
            next.date_limite_paiement = due;
        }
        if patch.observations.is_some() {
            next.observations = patch.observations;
        }
        *self = next;
        Ok(())
    }

    pub fn remind(&mut self, now: DateTime<Utc>) -> Result<Reminder> {
        self.step(TicketAction::Amend, now)?;
        self.rappels += 1;
        Ok(Reminder {
            ticket_id: self.id,
            numero_pv: self.numero_pv.clone(),
            date_rappel: now,
            numero_rappel: self.rappels,
            montant_du: self.remaining(now),
            date_limite: self.date_limite_paiement,
        })
    }

    /// Reserves the ticket for a newly filed appeal.
    pub fn open_appeal(&mut self, appeal: AppealId, now: DateTime<Utc>) -> Result<()> {
        self.step(TicketAction::Amend, now)?;
        if let Some(active) = self.active_appeal {
            return Err(LifecycleError::invalid_transition(
                "ticket",
                format!("{} (appeal {active} active)", self.statut),
                "file an appeal against",
            ));
        }
        self.active_appeal = Some(appeal);
        Ok(())
    }

    pub fn release_appeal(&mut self, appeal: AppealId, now: DateTime<Utc>) {
        if self.active_appeal == Some(appeal) {
            self.active_appeal = None;
            self.updated_at = now;
        }
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        self.statut.apply(TicketAction::Delete).map(|_| ())
    }
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LifecycleError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    pub statut: Option<TicketStatus>,
    pub infraction_id: Option<InfractionId>,
    pub date_debut: Option<DateTime<Utc>>,
    pub date_fin: Option<DateTime<Utc>>,
    pub montant_min: Option<Money>,
    pub montant_max: Option<Money>,
    /// Only tickets expired at this instant.
    pub expired_as_of: Option<DateTime<Utc>>,
}

impl TicketFilter {
    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.statut.is_none_or(|s| s == ticket.statut)
            && self
                .infraction_id
                .is_none_or(|id| ticket.infraction_ids.contains(&id))
            && self.date_debut.is_none_or(|d| ticket.date_emission >= d)
            && self.date_fin.is_none_or(|d| ticket.date_emission <= d)
            && self.montant_min.is_none_or(|m| ticket.montant_total >= m)
            && self.montant_max.is_none_or(|m| ticket.montant_total <= m)
            && self.expired_as_of.is_none_or(|now| ticket.is_expired(now))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketStatistics {
    pub total_pv: usize,
    pub montant_total: Money,
    pub montant_paye: Money,
    pub montant_impaye: Money,
    /// Percentage of the billed amount collected, 2 decimal places.
    pub taux_recouvrement: Decimal,
    pub pv_expires: usize,
    pub par_statut: BTreeMap<String, usize>,
    pub par_mois: BTreeMap<String, Money>,
}

impl TicketStatistics {
    /// Cancelled tickets count towards `total_pv` and `par_statut` only.
    pub fn from_records(records: &[Ticket], now: DateTime<Utc>) -> Self {
        let mut stats = Self {
            total_pv: records.len(),
            ..Self::default()
        };
        for ticket in records {
            *stats.par_statut.entry(ticket.statut.to_string()).or_default() += 1;
            if ticket.statut == TicketStatus::Annule {
                continue;
            }
            let due = ticket.amount_due(now);
            stats.montant_total += due;
            stats.montant_paye += ticket.montant_paye;
            stats.montant_impaye += ticket.remaining(now);
            stats.pv_expires += usize::from(ticket.is_expired(now));
            *stats
                .par_mois
                .entry(ticket.date_emission.format("%Y-%m").to_string())
                .or_default() += due;
        }
        if !stats.montant_total.is_zero() {
            stats.taux_recouvrement = (stats.montant_paye.value() * dec!(100)
                / stats.montant_total.value())
            .round_dp(2);
        }
        stats
    }
}
