use crate::domain::clock::Clock;
use crate::domain::fine::InfractionType;
use crate::domain::ids::InfractionId;
use crate::domain::infraction::{
    Infraction, InfractionAction, InfractionFilter, InfractionPatch, InfractionStatistics,
    NewInfraction,
};
use crate::domain::ports::{ChangeSet, InfractionStoreRef, InfractionTypeStoreRef, RecordKey};
use crate::error::{LifecycleError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Infraction types and the infraction state machine.
#[derive(Clone)]
pub struct InfractionService {
    types: InfractionTypeStoreRef,
    infractions: InfractionStoreRef,
    clock: Arc<dyn Clock>,
}

impl InfractionService {
    pub fn new(
        types: InfractionTypeStoreRef,
        infractions: InfractionStoreRef,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            types,
            infractions,
            clock,
        }
    }

    /// Registers a new infraction type. Existing codes are immutable.
    pub async fn register_type(&self, kind: InfractionType) -> Result<InfractionType> {
        if kind.code.trim().is_empty() {
            return Err(LifecycleError::validation("code is required"));
        }
        if kind.amende.value() < Decimal::ZERO {
            return Err(LifecycleError::validation("amende cannot be negative"));
        }
        if self.types.get(&kind.code).await?.is_some() {
            return Err(LifecycleError::validation(format!(
                "infraction type {} already exists",
                kind.code
            )));
        }
        self.types.create(kind.clone()).await?;

        info!(code = %kind.code, amende = %kind.amende, points = kind.points, "infraction type registered");
        self.get_type(&kind.code).await
    }

    /// Only the `active` flag of a type may change once registered.
    pub async fn set_type_active(&self, code: &str, active: bool) -> Result<InfractionType> {
        let mut kind = self.get_type(code).await?;
        kind.active = active;
        self.types.update(kind).await?;

        info!(code, active, "infraction type toggled");
        self.get_type(code).await
    }

    pub async fn get_type(&self, code: &str) -> Result<InfractionType> {
        self.types
            .get(code)
            .await?
            .ok_or_else(|| LifecycleError::not_found("infraction type", code))
    }

    pub async fn list_types(&self) -> Result<Vec<InfractionType>> {
        self.types.list().await
    }

    async fn known_type(&self, code: &str) -> Result<InfractionType> {
        self.types
            .get(code)
            .await?
            .ok_or_else(|| LifecycleError::validation(format!("invalid infraction type: {code}")))
    }

    pub async fn record(&self, draft: NewInfraction) -> Result<Infraction> {
        let now = self.clock.now();
        let kind = self.known_type(&draft.type_code).await?;
        let infraction = Infraction::record(draft, &kind, now)?;
        self.infractions.create(infraction.clone()).await?;

        info!(
            infraction = %infraction.id,
            type_code = %infraction.type_code,
            montant = %infraction.montant_amende,
            points = infraction.points_retires,
            "infraction recorded"
        );
        self.get(infraction.id).await
    }

    pub async fn get(&self, id: InfractionId) -> Result<Infraction> {
        self.infractions
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("infraction", id))
    }

    pub async fn list(&self, filter: &InfractionFilter) -> Result<Vec<Infraction>> {
        self.infractions.list(filter).await
    }

    pub async fn statistics(&self, filter: &InfractionFilter) -> Result<InfractionStatistics> {
        let infractions = self.infractions.list(filter).await?;
        Ok(InfractionStatistics::from_records(&infractions))
    }

    /// Partial update. Only a change of `type_code` reprices the infraction.
    pub async fn update(&self, id: InfractionId, mut patch: InfractionPatch) -> Result<Infraction> {
        let now = self.clock.now();
        let mut infraction = self.get(id).await?;
        if patch.type_code.as_deref() == Some(infraction.type_code.as_str()) {
            patch.type_code = None;
        }
        let new_kind = match &patch.type_code {
            Some(code) => Some(self.known_type(code).await?),
            None => None,
        };
        infraction.apply_patch(patch, new_kind.as_ref(), now)?;
        self.infractions.update(infraction.clone()).await?;

        info!(infraction = %id, montant = %infraction.montant_amende, "infraction updated");
        self.get(id).await
    }

    /// Deletes an infraction that no ticket refers to.
    pub async fn delete(&self, id: InfractionId) -> Result<()> {
        let infraction = self.get(id).await?;
        if let Some(numero_pv) = &infraction.numero_pv {
            return Err(LifecycleError::invalid_transition(
                "infraction",
                format!("{} (ticket {numero_pv})", infraction.statut),
                "delete",
            ));
        }
        self.infractions
            .commit(ChangeSet::new().delete(RecordKey::Infraction(id), infraction.revision))
            .await?;

        info!(infraction = %id, "infraction deleted");
        Ok(())
    }

    async fn transition(&self, id: InfractionId, action: InfractionAction) -> Result<Infraction> {
        let now = self.clock.now();
        let mut infraction = self.get(id).await?;
        let previous = infraction.transition(action, now).inspect_err(|e| {
            warn!(infraction = %id, action = action.label(), error = %e, "transition rejected")
        })?;
        self.infractions.update(infraction.clone()).await?;

        info!(infraction = %id, from = %previous, to = %infraction.statut, "infraction transition");
        self.get(id).await
    }

    pub async fn validate(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Validate).await
    }

    pub async fn contest(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Contest).await
    }

    pub async fn reinstate(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Reinstate).await
    }

    pub async fn cancel(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Cancel).await
    }

    pub async fn archive(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Archive).await
    }

    pub async fn unarchive(&self, id: InfractionId) -> Result<Infraction> {
        self.transition(id, InfractionAction::Unarchive).await
    }
}
