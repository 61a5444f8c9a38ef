use super::csv::command_reader::{CommandRecord, Op};
use super::csv::ticket_writer::TicketSummary;
use crate::application::engine::TrafficEngine;
use crate::domain::appeal::{AppealRuling, AppealType, NewAppeal};
use crate::domain::fine::{InfractionType, SpeedReading};
use crate::domain::ids::{AppealId, InfractionId, PaymentId, TicketId};
use crate::domain::infraction::NewInfraction;
use crate::domain::money::{Amount, Money};
use crate::domain::payment::{NewPayment, PaymentMethod};
use crate::domain::ticket::{Decision, NewTicket, TicketFilter};
use crate::error::{LifecycleError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Name recorded as handler for appeal decisions taken from the journal.
const JOURNAL_AGENT: &str = "journal";

/// Replays journal commands through a [`TrafficEngine`].
///
/// Journal references are resolved to the ids of the entities created under them. A failed
/// command leaves both the store and the reference table untouched.
pub struct Replayer {
    engine: TrafficEngine,
    infractions: HashMap<String, InfractionId>,
    tickets: HashMap<String, TicketId>,
    payments: HashMap<String, PaymentId>,
    appeals: HashMap<String, AppealId>,
}

fn resolve<T: Copy>(labels: &HashMap<String, T>, entity: &'static str, label: &str) -> Result<T> {
    labels
        .get(label)
        .copied()
        .ok_or_else(|| LifecycleError::not_found(entity, label))
}

fn ensure_unbound<T>(labels: &HashMap<String, T>, label: &str) -> Result<()> {
    if labels.contains_key(label) {
        return Err(LifecycleError::validation(format!(
            "journal reference {label} is already bound"
        )));
    }
    Ok(())
}

impl Replayer {
    pub fn new(engine: TrafficEngine) -> Self {
        Self {
            engine,
            infractions: HashMap::new(),
            tickets: HashMap::new(),
            payments: HashMap::new(),
            appeals: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &TrafficEngine {
        &self.engine
    }

    pub async fn apply(&mut self, command: CommandRecord) -> Result<()> {
        debug!(op = ?command.op, reference = %command.reference, "replaying command");
        let label = command.reference.as_str();
        let engine = &self.engine;

        match command.op {
            Op::Type => {
                let kind = InfractionType::new(
                    label,
                    command.text_or(label),
                    Money::new(command.amount()?),
                    command.points.unwrap_or(0),
                    command.target.as_deref().unwrap_or("general"),
                );
                engine.infractions.register_type(kind).await?;
            }
            Op::Infraction => {
                ensure_unbound(&self.infractions, label)?;
                let mut draft =
                    NewInfraction::new(command.target()?, command.text_or("-"), engine.clock().now());
                if let (Some(measured), Some(limit)) = (command.measured, command.limit) {
                    draft = draft.with_speed(SpeedReading::new(measured, limit));
                }
                if command.flag == Some(true) {
                    draft = draft.flagrant();
                }
                let infraction = engine.infractions.record(draft).await?;
                self.infractions.insert(label.to_string(), infraction.id);
            }
            Op::Validate => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.validate(id).await?;
            }
            Op::ContestInfraction => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.contest(id).await?;
            }
            Op::Reinstate => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.reinstate(id).await?;
            }
            Op::CancelInfraction => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.cancel(id).await?;
            }
            Op::Archive => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.archive(id).await?;
            }
            Op::Unarchive => {
                let id = resolve(&self.infractions, "infraction", label)?;
                engine.infractions.unarchive(id).await?;
            }
            Op::Ticket => {
                ensure_unbound(&self.tickets, label)?;
                let infraction_ids = command
                    .target()?
                    .split(';')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(|r| resolve(&self.infractions, "infraction", r))
                    .collect::<Result<Vec<_>>>()?;
                let montant_total = match command.amount {
                    Some(amount) => Money::new(amount),
                    None => {
                        let mut total = Money::ZERO;
                        for id in &infraction_ids {
                            total += engine.infractions.get(*id).await?.montant_amende;
                        }
                        total
                    }
                };
                let ticket = engine
                    .tickets
                    .issue(NewTicket {
                        infraction_ids,
                        montant_total,
                        date_limite_paiement: None,
                        observations: command.text.clone(),
                    })
                    .await?;
                self.tickets.insert(label.to_string(), ticket.id);
            }
            Op::Pay => {
                let id = resolve(&self.tickets, "ticket", label)?;
                let moyen = match command.target.as_deref() {
                    Some(moyen) => moyen.parse()?,
                    None => PaymentMethod::Especes,
                };
                engine
                    .tickets
                    .pay(id, Amount::new(command.amount()?)?, moyen)
                    .await?;
            }
            Op::Majorer => {
                let id = resolve(&self.tickets, "ticket", label)?;
                engine
                    .tickets
                    .majorer(id, Amount::new(command.amount()?)?, None)
                    .await?;
            }
            Op::Late => {
                let id = resolve(&self.tickets, "ticket", label)?;
                engine.tickets.mark_late(id).await?;
            }
            Op::Contest => {
                let id = resolve(&self.tickets, "ticket", label)?;
                engine
                    .tickets
                    .contest(id, command.text_or(""), command.target.clone())
                    .await?;
            }
            Op::Ruling => {
                let id = resolve(&self.tickets, "ticket", label)?;
                let decision: Decision = command.target()?.parse()?;
                let nouveau_montant = command.amount.map(Amount::new).transpose()?;
                engine
                    .tickets
                    .decide_contestation(id, decision, command.text_or(""), nouveau_montant)
                    .await?;
            }
            Op::Cancel => {
                let id = resolve(&self.tickets, "ticket", label)?;
                engine.tickets.cancel(id, command.text_or("")).await?;
            }
            Op::Remind => {
                let id = resolve(&self.tickets, "ticket", label)?;
                engine.tickets.remind(id).await?;
            }
            Op::Payment => {
                ensure_unbound(&self.payments, label)?;
                let ticket_id = resolve(&self.tickets, "ticket", command.target()?)?;
                let moyen = match command.text.as_deref() {
                    Some(moyen) => moyen.parse()?,
                    None => PaymentMethod::Especes,
                };
                let payment = engine
                    .payments
                    .create(NewPayment {
                        ticket_id,
                        montant: Amount::new(command.amount()?)?,
                        moyen,
                        reference_externe: None,
                        details: None,
                    })
                    .await?;
                self.payments.insert(label.to_string(), payment.id);
            }
            Op::Confirm => {
                let id = resolve(&self.payments, "payment", label)?;
                engine.payments.validate(id, command.text_or(label)).await?;
            }
            Op::Refuse => {
                let id = resolve(&self.payments, "payment", label)?;
                engine.payments.refuse(id, command.text_or("")).await?;
            }
            Op::Refund => {
                let id = resolve(&self.payments, "payment", label)?;
                let amount = command.amount.map(Amount::new).transpose()?;
                engine
                    .payments
                    .refund(id, amount, command.text.clone())
                    .await?;
            }
            Op::Receipt => {
                let id = resolve(&self.payments, "payment", label)?;
                engine
                    .payments
                    .generate_treasury_receipt(id, command.target()?, command.text_or(""))
                    .await?;
            }
            Op::Appeal => {
                ensure_unbound(&self.appeals, label)?;
                let ticket_id = resolve(&self.tickets, "ticket", command.target()?)?;
                let motif = command.text_or("").to_string();
                let appeal = engine
                    .appeals
                    .file(NewAppeal {
                        ticket_id,
                        type_recours: AppealType::Gracieux,
                        argumentaire: motif.clone(),
                        motif,
                        autorite_competente: None,
                        date_limite_recours: None,
                        observations: None,
                    })
                    .await?;
                self.appeals.insert(label.to_string(), appeal.id);
            }
            Op::Assign => {
                let id = resolve(&self.appeals, "appeal", label)?;
                engine.appeals.assign(id, command.text_or(JOURNAL_AGENT)).await?;
            }
            Op::Decide => {
                let id = resolve(&self.appeals, "appeal", label)?;
                let mut ruling = AppealRuling::new(command.target()?.parse()?, command.text_or(""));
                ruling.nouveau_montant = command.amount.map(Amount::new).transpose()?;
                ruling.recours_possible = command.flag;
                engine.appeals.decide(id, ruling, JOURNAL_AGENT).await?;
            }
            Op::Abandon => {
                let id = resolve(&self.appeals, "appeal", label)?;
                engine.appeals.abandon(id, command.text_or("")).await?;
            }
        }
        Ok(())
    }

    /// Every stored ticket, labelled with its journal reference when it has one.
    pub async fn summary(&self) -> Result<Vec<TicketSummary>> {
        let now = self.engine.clock().now();
        let labels: HashMap<TicketId, &str> = self
            .tickets
            .iter()
            .map(|(label, id)| (*id, label.as_str()))
            .collect();

        let tickets = self.engine.tickets.list(&TicketFilter::default()).await?;
        Ok(tickets
            .iter()
            .map(|ticket| {
                let label = labels
                    .get(&ticket.id)
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| ticket.id.to_string());
                TicketSummary::of(label, ticket, now)
            })
            .collect())
    }
}
