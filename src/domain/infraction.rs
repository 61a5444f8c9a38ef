use super::fine::{InfractionType, SpeedReading, compute_fine};
use super::ids::{InfractionId, TicketId};
use super::money::Money;
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfractionStatus {
    Constatee,
    Validee,
    Payee,
    Contestee,
    Annulee,
    Archivee,
}

impl InfractionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Constatee => "CONSTATEE",
            Self::Validee => "VALIDEE",
            Self::Payee => "PAYEE",
            Self::Contestee => "CONTESTEE",
            Self::Annulee => "ANNULEE",
            Self::Archivee => "ARCHIVEE",
        }
    }

    /// Applies `action` and returns the next status, or the reason it is refused.
    pub fn apply(self, action: InfractionAction) -> Result<Self> {
        use InfractionAction as A;
        use InfractionStatus::*;

        match (self, action) {
            (Constatee, A::Validate) => Ok(Validee),
            (Validee, A::Validate) => Err(LifecycleError::AlreadyProcessed(
                "infraction already validated".into(),
            )),
            (Constatee | Validee, A::LinkTicket) => Ok(Validee),
            (Constatee | Validee, A::RecordPayment) => Ok(Payee),
            (Payee | Archivee, A::RecordPayment) => Err(LifecycleError::AlreadyProcessed(
                "infraction already paid".into(),
            )),
            (Constatee | Validee, A::Contest) => Ok(Contestee),
            (Contestee, A::Contest) => Err(LifecycleError::AlreadyProcessed(
                "infraction already contested".into(),
            )),
            (Contestee, A::Reinstate) => Ok(Validee),
            (Constatee | Validee | Contestee, A::Cancel) => Ok(Annulee),
            (Annulee, A::Cancel) => Err(LifecycleError::AlreadyProcessed(
                "infraction already cancelled".into(),
            )),
            (Payee | Annulee, A::Archive) => Ok(Archivee),
            (Archivee, A::Unarchive) => Ok(Payee),
            (from, action) => Err(LifecycleError::invalid_transition(
                "infraction",
                from,
                action.label(),
            )),
        }
    }

    pub fn is_editable(self) -> bool {
        matches!(self, Self::Constatee | Self::Validee)
    }
}

impl fmt::Display for InfractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfractionAction {
    Validate,
    LinkTicket,
    RecordPayment,
    Contest,
    Reinstate,
    Cancel,
    Archive,
    Unarchive,
}

impl InfractionAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::LinkTicket => "generate a ticket for",
            Self::RecordPayment => "record a payment on",
            Self::Contest => "contest",
            Self::Reinstate => "reinstate",
            Self::Cancel => "cancel",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
        }
    }
}

/// Data captured by the officer when recording an infraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInfraction {
    pub type_code: String,
    pub date_infraction: DateTime<Utc>,
    pub lieu: String,
    pub vitesse: Option<SpeedReading>,
    pub appareil_mesure: Option<String>,
    pub circonstances: Option<String>,
    pub flagrant_delit: bool,
    pub accident: bool,
    pub observations: Option<String>,
}

impl NewInfraction {
    pub fn new(type_code: impl Into<String>, lieu: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            type_code: type_code.into(),
            date_infraction: at,
            lieu: lieu.into(),
            vitesse: None,
            appareil_mesure: None,
            circonstances: None,
            flagrant_delit: false,
            accident: false,
            observations: None,
        }
    }

    pub fn with_speed(mut self, reading: SpeedReading) -> Self {
        self.vitesse = Some(reading);
        self
    }

    pub fn flagrant(mut self) -> Self {
        self.flagrant_delit = true;
        self
    }
}

/// Partial update of an infraction. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfractionPatch {
    pub type_code: Option<String>,
    pub date_infraction: Option<DateTime<Utc>>,
    pub lieu: Option<String>,
    pub vitesse: Option<SpeedReading>,
    pub appareil_mesure: Option<String>,
    pub circonstances: Option<String>,
    pub flagrant_delit: Option<bool>,
    pub accident: Option<bool>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infraction {
    pub id: InfractionId,
    pub type_code: String,
    pub date_infraction: DateTime<Utc>,
    pub lieu: String,
    pub vitesse: Option<SpeedReading>,
    pub appareil_mesure: Option<String>,
    pub circonstances: Option<String>,
    pub flagrant_delit: bool,
    pub accident: bool,
    /// Fixed at creation; only a type change reprices it.
    pub montant_amende: Money,
    pub points_retires: u32,
    pub statut: InfractionStatus,
    pub numero_pv: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub observations: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Infraction {
    /// Validates the draft and prices it against its type.
    pub fn record(draft: NewInfraction, kind: &InfractionType, now: DateTime<Utc>) -> Result<Self> {
        if draft.lieu.trim().is_empty() {
            return Err(LifecycleError::validation("lieu_infraction is required"));
        }
        if draft.type_code != kind.code {
            return Err(LifecycleError::validation(format!(
                "infraction type mismatch: {} != {}",
                draft.type_code, kind.code
            )));
        }
        let fine = compute_fine(kind, draft.vitesse.as_ref(), draft.flagrant_delit)?;

        Ok(Self {
            id: InfractionId::new(),
            type_code: draft.type_code,
            date_infraction: draft.date_infraction,
            lieu: draft.lieu,
            vitesse: draft.vitesse,
            appareil_mesure: draft.appareil_mesure,
            circonstances: draft.circonstances,
            flagrant_delit: draft.flagrant_delit,
            accident: draft.accident,
            montant_amende: fine.montant,
            points_retires: fine.points,
            statut: InfractionStatus::Constatee,
            numero_pv: None,
            ticket_id: None,
            observations: draft.observations,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    /// Moves to the next status; returns the previous one.
    pub fn transition(
        &mut self,
        action: InfractionAction,
        now: DateTime<Utc>,
    ) -> Result<InfractionStatus> {
        let previous = self.statut;
        self.statut = previous.apply(action)?;
        self.updated_at = now;
        Ok(previous)
    }

    /// Attaches the infraction to a ticket. An infraction is never reassigned.
    pub fn link_ticket(
        &mut self,
        ticket_id: TicketId,
        numero_pv: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(existing) = &self.numero_pv {
            return Err(LifecycleError::AlreadyProcessed(format!(
                "infraction {} already belongs to ticket {existing}",
                self.id
            )));
        }
        self.transition(InfractionAction::LinkTicket, now)?;
        self.ticket_id = Some(ticket_id);
        self.numero_pv = Some(numero_pv.to_string());
        Ok(())
    }

    pub fn unlink_ticket(&mut self, now: DateTime<Utc>) {
        self.ticket_id = None;
        self.numero_pv = None;
        self.updated_at = now;
    }

    /// Applies a partial update. `new_kind` must be the type named by `patch.type_code`;
    /// when present the fine is recomputed from scratch.
    pub fn apply_patch(
        &mut self,
        patch: InfractionPatch,
        new_kind: Option<&InfractionType>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.statut.is_editable() {
            return Err(LifecycleError::invalid_transition(
                "infraction",
                self.statut,
                "update",
            ));
        }
        if let Some(lieu) = &patch.lieu
            && lieu.trim().is_empty()
        {
            return Err(LifecycleError::validation("lieu_infraction cannot be empty"));
        }
        if let Some(reading) = &patch.vitesse {
            reading.excess()?;
        }

        let mut next = self.clone();
        if let Some(date) = patch.date_infraction {
            next.date_infraction = date;
        }
        if let Some(lieu) = patch.lieu {
            next.lieu = lieu;
        }
        if patch.vitesse.is_some() {
            next.vitesse = patch.vitesse;
        }
        if patch.appareil_mesure.is_some() {
            next.appareil_mesure = patch.appareil_mesure;
        }
        if patch.circonstances.is_some() {
            next.circonstances = patch.circonstances;
        }
        if let Some(flag) = patch.flagrant_delit {
            next.flagrant_delit = flag;
        }
        if let Some(flag) = patch.accident {
            next.accident = flag;
        }
        if patch.observations.is_some() {
            next.observations = patch.observations;
        }

        match (patch.type_code, new_kind) {
            (Some(code), Some(kind)) if code == kind.code => {
                let fine = compute_fine(kind, next.vitesse.as_ref(), next.flagrant_delit)?;
                next.type_code = code;
                next.montant_amende = fine.montant;
                next.points_retires = fine.points;
            }
            (Some(code), _) => {
                return Err(LifecycleError::validation(format!(
                    "invalid infraction type: {code}"
                )));
            }
            (None, _) => {}
        }

        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

/// Selection criteria for listing infractions; every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfractionFilter {
    pub statut: Option<InfractionStatus>,
    pub type_code: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub lieu: Option<String>,
    pub date_debut: Option<DateTime<Utc>>,
    pub date_fin: Option<DateTime<Utc>>,
    pub flagrant_delit: Option<bool>,
    pub accident: Option<bool>,
}

impl InfractionFilter {
    pub fn matches(&self, infraction: &Infraction) -> bool {
        self.statut.is_none_or(|s| s == infraction.statut)
            && self
                .type_code
                .as_ref()
                .is_none_or(|c| *c == infraction.type_code)
            && self
                .ticket_id
                .is_none_or(|t| infraction.ticket_id == Some(t))
            && self.lieu.as_ref().is_none_or(|l| {
                infraction
                    .lieu
                    .to_lowercase()
                    .contains(&l.to_lowercase())
            })
            && self
                .date_debut
                .is_none_or(|d| infraction.date_infraction >= d)
            && self.date_fin.is_none_or(|d| infraction.date_infraction <= d)
            && self
                .flagrant_delit
                .is_none_or(|f| f == infraction.flagrant_delit)
            && self.accident.is_none_or(|a| a == infraction.accident)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InfractionStatistics {
    pub total: usize,
    pub par_statut: BTreeMap<String, usize>,
    pub par_type: BTreeMap<String, usize>,
    pub par_mois: BTreeMap<String, usize>,
    pub montant_total: Money,
    pub points_total: u64,
    pub flagrant_delit_total: usize,
    pub accident_total: usize,
}

impl InfractionStatistics {
    pub fn from_records(records: &[Infraction]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };
        for infraction in records {
            *stats
                .par_statut
                .entry(infraction.statut.to_string())
                .or_default() += 1;
            *stats
                .par_type
                .entry(infraction.type_code.clone())
                .or_default() += 1;
            *stats
                .par_mois
                .entry(infraction.date_infraction.format("%Y-%m").to_string())
                .or_default() += 1;
            stats.montant_total += infraction.montant_amende;
            stats.points_total += u64::from(infraction.points_retires);
            stats.flagrant_delit_total += usize::from(infraction.flagrant_delit);
            stats.accident_total += usize::from(infraction.accident);
        }
        stats
    }
}
