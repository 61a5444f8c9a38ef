use super::ids::{PaymentId, TicketId};
use super::money::{Amount, Money};
use super::ticket::Ticket;
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    EnCours,
    Valide,
    Refuse,
    Rembourse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cb,
    Cheque,
    Especes,
    Virement,
    MobileMoney,
    TresorPublic,
}

impl PaymentMethod {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cb => "CB",
            Self::Cheque => "CHEQUE",
            Self::Especes => "ESPECES",
            Self::Virement => "VIREMENT",
            Self::MobileMoney => "MOBILE_MONEY",
            Self::TresorPublic => "TRESOR_PUBLIC",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PaymentMethod {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CB" => Ok(Self::Cb),
            "CHEQUE" => Ok(Self::Cheque),
            "ESPECES" => Ok(Self::Especes),
            "VIREMENT" => Ok(Self::Virement),
            "MOBILE_MONEY" => Ok(Self::MobileMoney),
            "TRESOR_PUBLIC" => Ok(Self::TresorPublic),
            other => Err(LifecycleError::validation(format!(
                "invalid payment method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    Validate,
    Refuse,
    Refund,
    Amend,
    Delete,
}

impl PaymentAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Refuse => "refuse",
            Self::Refund => "refund",
            Self::Amend => "update",
            Self::Delete => "delete",
        }
    }
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::EnCours => "EN_COURS",
            Self::Valide => "VALIDE",
            Self::Refuse => "REFUSE",
            Self::Rembourse => "REMBOURSE",
        }
    }

    pub fn apply(self, action: PaymentAction) -> Result<Self> {
        use PaymentAction as A;
        use PaymentStatus::*;

        match (self, action) {
            (EnCours, A::Validate) => Ok(Valide),
            (EnCours, A::Refuse) => Ok(Refuse),
            (EnCours, A::Amend | A::Delete) => Ok(EnCours),
            (Valide, A::Refund) => Ok(Rembourse),
            (Valide, A::Validate) | (Refuse, A::Refuse) | (Rembourse, A::Refund) => Err(
                LifecycleError::AlreadyProcessed(format!("payment already {self}")),
            ),
            (from, _) => Err(LifecycleError::invalid_transition(
                "payment",
                from,
                action.label(),
            )),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub ticket_id: TicketId,
    pub montant: Amount,
    pub moyen: PaymentMethod,
    pub reference_externe: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentPatch {
    pub reference_externe: Option<String>,
    pub details: Option<String>,
}

/// Treasury-office data stamped on a TRESOR_PUBLIC payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryStamp {
    pub numero_recu: String,
    pub agent: String,
    pub bureau: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub numero_transaction: String,
    pub ticket_id: TicketId,
    pub montant: Money,
    pub moyen: PaymentMethod,
    pub statut: PaymentStatus,
    pub date_paiement: DateTime<Utc>,
    pub code_autorisation: Option<String>,
    pub reference_externe: Option<String>,
    pub details: Option<String>,
    pub date_validation: Option<DateTime<Utc>>,
    pub motif_refus: Option<String>,
    pub montant_rembourse: Option<Money>,
    pub note_remboursement: Option<String>,
    pub date_remboursement: Option<DateTime<Utc>>,
    pub tresor: Option<TreasuryStamp>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Payment {
    pub fn open(request: NewPayment, numero_transaction: String, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            numero_transaction,
            ticket_id: request.ticket_id,
            montant: Money::from(request.montant).rounded(),
            moyen: request.moyen,
            statut: PaymentStatus::EnCours,
            date_paiement: now,
            code_autorisation: None,
            reference_externe: request.reference_externe,
            details: request.details,
            date_validation: None,
            motif_refus: None,
            montant_rembourse: None,
            note_remboursement: None,
            date_remboursement: None,
            tresor: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// The payment amount as a strictly positive value, for application to a ticket.
    pub fn amount(&self) -> Result<Amount> {
        Amount::new(self.montant.value())
    }

    fn step(&mut self, action: PaymentAction, now: DateTime<Utc>) -> Result<PaymentStatus> {
        let previous = self.statut;
        self.statut = previous.apply(action)?;
        self.updated_at = now;
        Ok(previous)
    }

    pub fn validate(&mut self, code_autorisation: &str, now: DateTime<Utc>) -> Result<()> {
        if code_autorisation.trim().is_empty() {
            return Err(LifecycleError::validation("code_autorisation is required"));
        }
        self.step(PaymentAction::Validate, now)?;
        self.code_autorisation = Some(code_autorisation.to_string());
        self.date_validation = Some(now);
        Ok(())
    }

    pub fn refuse(&mut self, motif: &str, now: DateTime<Utc>) -> Result<()> {
        if motif.trim().is_empty() {
            return Err(LifecycleError::validation("motif_refus is required"));
        }
        self.step(PaymentAction::Refuse, now)?;
        self.motif_refus = Some(motif.to_string());
        Ok(())
    }

    /// Refunds all of the payment, or `partial` of it. Returns the refunded amount.
    pub fn refund(
        &mut self,
        partial: Option<Amount>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Money> {
        let refunded = match partial {
            Some(amount) => amount.rounded()?.into(),
            None => self.montant,
        };
        if refunded > self.montant {
            return Err(LifecycleError::AmountMismatch(format!(
                "refund of {refunded} exceeds payment {} of {}",
                self.numero_transaction, self.montant
            )));
        }
        self.step(PaymentAction::Refund, now)?;
        self.montant_rembourse = Some(refunded);
        self.note_remboursement = note;
        self.date_remboursement = Some(now);
        Ok(refunded)
    }

    /// Stamps the treasury receipt. Returns `true` when this also validated the payment.
    pub fn stamp_treasury(&mut self, stamp: TreasuryStamp, now: DateTime<Utc>) -> Result<bool> {
        if self.moyen != PaymentMethod::TresorPublic {
            return Err(LifecycleError::validation(format!(
                "payment {} is {}, not TRESOR_PUBLIC",
                self.numero_transaction, self.moyen
            )));
        }
        if let Some(existing) = &self.tresor {
            return Err(LifecycleError::AlreadyProcessed(format!(
                "payment {} already has receipt {}",
                self.numero_transaction, existing.numero_recu
            )));
        }
        for (value, field) in [(&stamp.agent, "agent_tresor"), (&stamp.bureau, "bureau_tresor")] {
            if value.trim().is_empty() {
                return Err(LifecycleError::validation(format!("{field} is required")));
            }
        }

        let validated = match self.statut {
            PaymentStatus::Valide => false,
            _ => {
                self.validate(&stamp.numero_recu, now)?;
                true
            }
        };
        self.details = Some(format!(
            "Paiement Trésor Public - Reçu: {} - Bureau: {} - Agent: {}",
            stamp.numero_recu, stamp.bureau, stamp.agent
        ));
        self.tresor = Some(stamp);
        self.updated_at = now;
        Ok(validated)
    }

    pub fn apply_patch(&mut self, patch: PaymentPatch, now: DateTime<Utc>) -> Result<()> {
        self.step(PaymentAction::Amend, now)?;
        if patch.reference_externe.is_some() {
            self.reference_externe = patch.reference_externe;
        }
        if patch.details.is_some() {
            self.details = patch.details;
        }
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        self.statut.apply(PaymentAction::Delete).map(|_| ())
    }
}

/// Printable receipt for a validated treasury payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreasuryReceipt {
    pub numero_recu: String,
    pub numero_transaction: String,
    pub payment_id: PaymentId,
    pub date_emission: DateTime<Utc>,
    pub montant: Money,
    pub montant_en_lettres: String,
    pub numero_pv: String,
    pub date_pv: DateTime<Utc>,
    pub agent: String,
    pub bureau: String,
    /// Payload encoded in the receipt's verification QR code.
    pub code_verification: String,
}

impl TreasuryReceipt {
    pub fn for_payment(payment: &Payment, ticket: &Ticket) -> Result<Self> {
        if payment.moyen != PaymentMethod::TresorPublic {
            return Err(LifecycleError::validation(format!(
                "payment {} is not TRESOR_PUBLIC",
                payment.numero_transaction
            )));
        }
        let (Some(stamp), Some(validated_at)) = (&payment.tresor, payment.date_validation) else {
            return Err(LifecycleError::not_found(
                "treasury receipt",
                &payment.numero_transaction,
            ));
        };
        if payment.statut != PaymentStatus::Valide {
            return Err(LifecycleError::not_found(
                "treasury receipt",
                &payment.numero_transaction,
            ));
        }

        Ok(Self {
            numero_recu: stamp.numero_recu.clone(),
            numero_transaction: payment.numero_transaction.clone(),
            payment_id: payment.id,
            date_emission: validated_at,
            montant: payment.montant,
            montant_en_lettres: amount_in_words(payment.montant),
            numero_pv: ticket.numero_pv.clone(),
            date_pv: ticket.date_emission,
            agent: stamp.agent.clone(),
            bureau: stamp.bureau.clone(),
            code_verification: verification_payload(
                &stamp.numero_recu,
                &payment.numero_transaction,
                payment.montant,
                validated_at,
            ),
        })
    }
}

/// `TRESOR|<receipt>|<transaction>|<amount, 2dp>|<YYYY-MM-DD>`
pub fn verification_payload(
    numero_recu: &str,
    numero_transaction: &str,
    montant: Money,
    validated_at: DateTime<Utc>,
) -> String {
    format!(
        "TRESOR|{numero_recu}|{numero_transaction}|{:.2}|{}",
        montant.rounded().value(),
        validated_at.format("%Y-%m-%d")
    )
}

const UNITS: [&str; 17] = [
    "zéro", "un", "deux", "trois", "quatre", "cinq", "six", "sept", "huit", "neuf", "dix", "onze",
    "douze", "treize", "quatorze", "quinze", "seize",
];
const TENS: [&str; 7] = ["", "", "vingt", "trente", "quarante", "cinquante", "soixante"];

fn below_hundred(n: u64) -> String {
    match n {
        0..=16 => UNITS[n as usize].to_string(),
        17..=19 => format!("dix-{}", UNITS[(n - 10) as usize]),
        20..=69 => {
            let tens = TENS[(n / 10) as usize];
            match n % 10 {
                0 => tens.to_string(),
                1 => format!("{tens} et un"),
                u => format!("{tens}-{}", UNITS[u as usize]),
            }
        }
        71 => "soixante et onze".to_string(),
        70..=79 => format!("soixante-{}", below_hundred(n - 60)),
        80 => "quatre-vingts".to_string(),
        _ => format!("quatre-vingt-{}", below_hundred(n - 80)),
    }
}

fn below_thousand(n: u64) -> String {
    let (hundreds, rest) = (n / 100, n % 100);
    if hundreds == 0 {
        return below_hundred(rest);
    }
    let head = match hundreds {
        1 => "cent".to_string(),
        h => format!("{} cent", UNITS[h as usize]),
    };
    match rest {
        0 if hundreds > 1 => format!("{head}s"),
        0 => head,
        _ => format!("{head} {}", below_hundred(rest)),
    }
}

/// "vingt" and "cent" lose their plural before "mille".
fn before_mille(words: String) -> String {
    if words.ends_with("vingts") || words.ends_with("cents") {
        words[..words.len() - 1].to_string()
    } else {
        words
    }
}

fn number_in_words(n: u64) -> String {
    if n == 0 {
        return UNITS[0].to_string();
    }
    let mut parts = Vec::new();
    let mut push_scale = |count: u64, singular: &str, plural: &str| {
        if count > 0 {
            let unit = if count > 1 { plural } else { singular };
            parts.push(format!("{} {unit}", number_in_words(count)));
        }
    };
    push_scale(n / 1_000_000_000, "milliard", "milliards");
    push_scale(n / 1_000_000 % 1000, "million", "millions");

    match n / 1000 % 1000 {
        0 => {}
        1 => parts.push("mille".to_string()),
        thousands => parts.push(format!("{} mille", before_mille(below_thousand(thousands)))),
    }
    if n % 1000 > 0 {
        parts.push(below_thousand(n % 1000));
    }
    parts.join(" ")
}

/// Spells an amount in French, e.g. `1 250.50` → "mille deux cent cinquante francs CFA et 50 centimes".
pub fn amount_in_words(montant: Money) -> String {
    let value = montant.rounded().value().abs();
    let whole = value.trunc();
    let units = whole.to_u64().unwrap_or(u64::MAX);
    let centimes = ((value - whole) * Decimal::ONE_HUNDRED)
        .to_u64()
        .unwrap_or_default();

    let mut words = match units {
        0 => "zéro franc CFA".to_string(),
        1 => "un franc CFA".to_string(),
        n => format!("{} francs CFA", number_in_words(n)),
    };
    if centimes > 0 {
        words.push_str(&format!(" et {centimes} centimes"));
    }
    words
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentFilter {
    pub ticket_id: Option<TicketId>,
    pub statut: Option<PaymentStatus>,
    pub moyen: Option<PaymentMethod>,
    pub date_debut: Option<DateTime<Utc>>,
    pub date_fin: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.ticket_id.is_none_or(|id| payment.ticket_id == id)
            && self.statut.is_none_or(|s| payment.statut == s)
            && self.moyen.is_none_or(|m| payment.moyen == m)
            && self.date_debut.is_none_or(|d| payment.date_paiement >= d)
            && self.date_fin.is_none_or(|d| payment.date_paiement <= d)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentStatistics {
    pub total_paiements: usize,
    pub montant_total: Money,
    pub montant_valide: Money,
    pub montant_en_cours: Money,
    pub montant_rembourse: Money,
    pub par_statut: BTreeMap<String, usize>,
    pub par_moyen: BTreeMap<String, usize>,
    /// Validated amount per `YYYY-MM`.
    pub evolution_mensuelle: BTreeMap<String, Money>,
}

impl PaymentStatistics {
    pub fn from_records(records: &[Payment]) -> Self {
        let mut stats = Self {
            total_paiements: records.len(),
            ..Self::default()
        };
        for payment in records {
            stats.montant_total += payment.montant;
            *stats.par_statut.entry(payment.statut.to_string()).or_default() += 1;
            *stats.par_moyen.entry(payment.moyen.to_string()).or_default() += 1;
            match payment.statut {
                PaymentStatus::Valide => {
                    stats.montant_valide += payment.montant;
                    *stats
                        .evolution_mensuelle
                        .entry(payment.date_paiement.format("%Y-%m").to_string())
                        .or_default() += payment.montant;
                }
                PaymentStatus::EnCours => stats.montant_en_cours += payment.montant,
                PaymentStatus::Rembourse => {
                    stats.montant_rembourse += payment.montant_rembourse.unwrap_or(payment.montant)
                }
                PaymentStatus::Refuse => {}
            }
        }
        stats
    }
}
