//! Appeal (recours) workflow.
//!
//! An appeal is filed against a ticket, optionally assigned to a handler, then decided or
//! abandoned. Its workflow stages are derived from the record on every read.

use super::ids::{AppealId, TicketId};
use super::money::{Amount, Money};
use super::ticket::Decision;
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppealStatus {
    Depose,
    EnCours,
    Accepte,
    Refuse,
    Abandonne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppealType {
    Gracieux,
    Contentieux,
    Hierarchique,
}

impl AppealType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Gracieux => "GRACIEUX",
            Self::Contentieux => "CONTENTIEUX",
            Self::Hierarchique => "HIERARCHIQUE",
        }
    }
}

impl fmt::Display for AppealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AppealType {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GRACIEUX" => Ok(Self::Gracieux),
            "CONTENTIEUX" => Ok(Self::Contentieux),
            "HIERARCHIQUE" => Ok(Self::Hierarchique),
            other => Err(LifecycleError::validation(format!(
                "invalid appeal type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealAction {
    Assign,
    Decide(Decision),
    Abandon,
    Amend,
    Delete,
}

impl AppealAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Decide(_) => "decide",
            Self::Abandon => "abandon",
            Self::Amend => "update",
            Self::Delete => "delete",
        }
    }
}

impl AppealStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Depose => "DEPOSE",
            Self::EnCours => "EN_COURS",
            Self::Accepte => "ACCEPTE",
            Self::Refuse => "REFUSE",
            Self::Abandonne => "ABANDONNE",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Depose | Self::EnCours)
    }

    pub fn apply(self, action: AppealAction) -> Result<Self> {
        use AppealAction as A;
        use AppealStatus::*;

        match (self, action) {
            (Depose | EnCours, A::Assign) => Ok(EnCours),
            (Depose | EnCours, A::Decide(Decision::Accepte)) => Ok(Accepte),
            (Depose | EnCours, A::Decide(_)) => Ok(Refuse),
            (Depose | EnCours, A::Abandon) => Ok(Abandonne),
            (Depose | EnCours, A::Amend) => Ok(self),
            (Depose, A::Delete) => Ok(Depose),
            (Accepte | Refuse, A::Decide(_)) | (Abandonne, A::Abandon) => Err(
                LifecycleError::AlreadyProcessed(format!("appeal already {self}")),
            ),
            (from, _) => Err(LifecycleError::invalid_transition(
                "appeal",
                from,
                action.label(),
            )),
        }
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppeal {
    pub ticket_id: TicketId,
    pub type_recours: AppealType,
    pub motif: String,
    pub argumentaire: String,
    pub autorite_competente: Option<String>,
    pub date_limite_recours: Option<DateTime<Utc>>,
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppealPatch {
    pub motif: Option<String>,
    pub argumentaire: Option<String>,
    pub autorite_competente: Option<String>,
    pub observations: Option<String>,
}

/// Ruling on an appeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppealRuling {
    pub decision: Decision,
    pub motif_decision: String,
    pub reference_decision: Option<String>,
    pub nouveau_montant: Option<Amount>,
    /// Whether a further appeal is open; defaults to `true` when unspecified.
    pub recours_possible: Option<bool>,
}

impl AppealRuling {
    pub fn new(decision: Decision, motif_decision: impl Into<String>) -> Self {
        Self {
            decision,
            motif_decision: motif_decision.into(),
            reference_decision: None,
            nouveau_montant: None,
            recours_possible: None,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.nouveau_montant = Some(amount);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appeal {
    pub id: AppealId,
    pub numero_recours: String,
    pub ticket_id: TicketId,
    pub type_recours: AppealType,
    pub motif: String,
    pub argumentaire: String,
    pub statut: AppealStatus,
    pub decision: Option<Decision>,
    pub motif_decision: Option<String>,
    pub reference_decision: Option<String>,
    pub nouveau_montant: Option<Money>,
    pub recours_possible: bool,
    pub autorite_competente: Option<String>,
    pub date_limite_recours: Option<DateTime<Utc>>,
    pub observations: Option<String>,
    pub traite_par: Option<String>,
    pub date_recours: DateTime<Utc>,
    pub date_traitement: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Appeal {
    pub fn file(request: NewAppeal, numero_recours: String, now: DateTime<Utc>) -> Result<Self> {
        require_text(&request.motif, "motif")?;
        require_text(&request.argumentaire, "argumentaire")?;

        Ok(Self {
            id: AppealId::new(),
            numero_recours,
            ticket_id: request.ticket_id,
            type_recours: request.type_recours,
            motif: request.motif,
            argumentaire: request.argumentaire,
            statut: AppealStatus::Depose,
            decision: None,
            motif_decision: None,
            reference_decision: None,
            nouveau_montant: None,
            recours_possible: true,
            autorite_competente: request.autorite_competente,
            date_limite_recours: request.date_limite_recours,
            observations: request.observations,
            traite_par: None,
            date_recours: now,
            date_traitement: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    fn step(&mut self, action: AppealAction, now: DateTime<Utc>) -> Result<AppealStatus> {
        let previous = self.statut;
        self.statut = previous.apply(action)?;
        self.updated_at = now;
        Ok(previous)
    }

    pub fn assign(&mut self, handler: &str, now: DateTime<Utc>) -> Result<()> {
        require_text(handler, "traite_par")?;
        self.step(AppealAction::Assign, now)?;
        self.traite_par = Some(handler.to_string());
        Ok(())
    }

    pub fn decide(
        &mut self,
        ruling: AppealRuling,
        handler: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        require_text(&ruling.motif_decision, "motif_decision")?;
        self.step(AppealAction::Decide(ruling.decision), now)?;
        self.decision = Some(ruling.decision);
        self.motif_decision = Some(ruling.motif_decision);
        self.reference_decision = ruling.reference_decision;
        self.nouveau_montant = ruling.nouveau_montant.map(|a| Money::from(a).rounded());
        self.recours_possible = ruling.recours_possible.unwrap_or(true);
        if !handler.trim().is_empty() {
            self.traite_par = Some(handler.to_string());
        }
        self.date_traitement = Some(now);
        Ok(())
    }

    pub fn abandon(&mut self, motif: &str, now: DateTime<Utc>) -> Result<()> {
        require_text(motif, "motif")?;
        self.step(AppealAction::Abandon, now)?;
        self.observations = Some(motif.to_string());
        self.date_traitement = Some(now);
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: AppealPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(motif) = &patch.motif {
            require_text(motif, "motif")?;
        }
        if let Some(argumentaire) = &patch.argumentaire {
            require_text(argumentaire, "argumentaire")?;
        }
        self.step(AppealAction::Amend, now)?;
        let AppealPatch {
            motif,
            argumentaire,
            autorite_competente,
            observations,
        } = patch;
        if let Some(motif) = motif {
            self.motif = motif;
        }
        if let Some(argumentaire) = argumentaire {
            self.argumentaire = argumentaire;
        }
        if autorite_competente.is_some() {
            self.autorite_competente = autorite_competente;
        }
        if observations.is_some() {
            self.observations = observations;
        }
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        self.statut.apply(AppealAction::Delete).map(|_| ())
    }

    /// Whole days between filing and decision, if decided.
    pub fn delai_traitement(&self) -> Option<i64> {
        self.date_traitement
            .map(|done| (done - self.date_recours).num_days())
    }

    pub fn stages(&self) -> Vec<WorkflowStage> {
        use AppealStatus::*;
        use StageState::*;

        let decided = matches!(self.statut, Accepte | Refuse | Abandonne);
        let mut stages = vec![
            WorkflowStage {
                code: StageCode::Depot,
                ordre: 1,
                statut: Terminee,
                responsable: None,
                date_debut: Some(self.date_recours),
                date_fin: Some(self.date_recours),
            },
            WorkflowStage {
                code: StageCode::PriseEnCharge,
                ordre: 2,
                statut: match self.statut {
                    Depose => AVenir,
                    EnCours => EnCoursStage,
                    _ => Terminee,
                },
                responsable: self.traite_par.clone(),
                date_debut: (self.statut != Depose).then_some(self.updated_at),
                date_fin: self.date_traitement,
            },
            WorkflowStage {
                code: StageCode::Instruction,
                ordre: 3,
                statut: match self.statut {
                    Depose => AVenir,
                    EnCours => EnCoursStage,
                    _ => Terminee,
                },
                responsable: self.traite_par.clone(),
                date_debut: None,
                date_fin: self.date_traitement,
            },
            WorkflowStage {
                code: StageCode::Decision,
                ordre: 4,
                statut: if decided { Terminee } else { AVenir },
                responsable: self.autorite_competente.clone(),
                date_debut: self.date_traitement.filter(|_| decided),
                date_fin: self.date_traitement.filter(|_| decided),
            },
        ];
        if self.recours_possible && matches!(self.statut, Accepte | Refuse) {
            stages.push(WorkflowStage {
                code: StageCode::Cloture,
                ordre: 5,
                statut: AVenir,
                responsable: None,
                date_debut: None,
                date_fin: None,
            });
        }
        stages
    }
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LifecycleError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageCode {
    Depot,
    PriseEnCharge,
    Instruction,
    Decision,
    Cloture,
}

impl StageCode {
    pub const fn libelle(self) -> &'static str {
        match self {
            Self::Depot => "Dépôt du recours",
            Self::PriseEnCharge => "Prise en charge",
            Self::Instruction => "Instruction du dossier",
            Self::Decision => "Décision",
            Self::Cloture => "Clôture ou nouveau recours",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageState {
    #[serde(rename = "TERMINEE")]
    Terminee,
    #[serde(rename = "EN_COURS")]
    EnCoursStage,
    #[serde(rename = "A_VENIR")]
    AVenir,
}

/// A read-only step of the appeal workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStage {
    pub code: StageCode,
    pub ordre: u8,
    pub statut: StageState,
    pub responsable: Option<String>,
    pub date_debut: Option<DateTime<Utc>>,
    pub date_fin: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppealFilter {
    pub ticket_id: Option<TicketId>,
    pub statut: Option<AppealStatus>,
    pub type_recours: Option<AppealType>,
    pub active_only: bool,
}

impl AppealFilter {
    pub fn matches(&self, appeal: &Appeal) -> bool {
        self.ticket_id.is_none_or(|id| appeal.ticket_id == id)
            && self.statut.is_none_or(|s| appeal.statut == s)
            && self.type_recours.is_none_or(|t| appeal.type_recours == t)
            && (!self.active_only || appeal.statut.is_active())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppealStatistics {
    pub total_recours: usize,
    pub par_statut: BTreeMap<String, usize>,
    pub par_type: BTreeMap<String, usize>,
    pub par_decision: BTreeMap<String, usize>,
    /// Share of decided appeals that were accepted, in percent.
    pub taux_acceptation: Decimal,
    pub delai_moyen_jours: Decimal,
}

impl AppealStatistics {
    pub fn from_records(records: &[Appeal]) -> Self {
        let mut stats = Self {
            total_recours: records.len(),
            ..Self::default()
        };
        let mut decided = 0u32;
        let mut accepted = 0u32;
        let mut delays = Vec::new();
        for appeal in records {
            *stats.par_statut.entry(appeal.statut.to_string()).or_default() += 1;
            *stats.par_type.entry(appeal.type_recours.to_string()).or_default() += 1;
            if let Some(decision) = appeal.decision {
                *stats.par_decision.entry(decision.to_string()).or_default() += 1;
                decided += 1;
                accepted += u32::from(decision == Decision::Accepte);
                delays.extend(appeal.delai_traitement());
            }
        }
        if decided > 0 {
            stats.taux_acceptation =
                (Decimal::from(accepted) * Decimal::ONE_HUNDRED / Decimal::from(decided)).round_dp(2);
        }
        if !delays.is_empty() {
            let sum: i64 = delays.iter().sum();
            stats.delai_moyen_jours =
                (Decimal::from(sum) / Decimal::from(delays.len() as u64)).round_dp(2);
        }
        stats
    }
}
