use super::appeal::{Appeal, AppealFilter};
use super::fine::InfractionType;
use super::ids::{AppealId, InfractionId, PaymentId, TicketId};
use super::infraction::{Infraction, InfractionFilter};
use super::payment::{Payment, PaymentFilter};
use super::ticket::{Ticket, TicketFilter};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Any persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    InfractionType(InfractionType),
    Infraction(Infraction),
    Ticket(Ticket),
    Payment(Payment),
    Appeal(Appeal),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    InfractionType(String),
    Infraction(InfractionId),
    Ticket(TicketId),
    Payment(PaymentId),
    Appeal(AppealId),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InfractionType(code) => write!(f, "infraction type {code}"),
            Self::Infraction(id) => write!(f, "infraction {id}"),
            Self::Ticket(id) => write!(f, "ticket {id}"),
            Self::Payment(id) => write!(f, "payment {id}"),
            Self::Appeal(id) => write!(f, "appeal {id}"),
        }
    }
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Self::InfractionType(t) => RecordKey::InfractionType(t.code.clone()),
            Self::Infraction(i) => RecordKey::Infraction(i.id),
            Self::Ticket(t) => RecordKey::Ticket(t.id),
            Self::Payment(p) => RecordKey::Payment(p.id),
            Self::Appeal(a) => RecordKey::Appeal(a.id),
        }
    }

    /// Unique human-facing number, for entities that carry one.
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            Self::Ticket(t) => Some(&t.numero_pv),
            Self::Payment(p) => Some(&p.numero_transaction),
            Self::Appeal(a) => Some(&a.numero_recours),
            Self::InfractionType(_) | Self::Infraction(_) => None,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Self::InfractionType(t) => t.revision,
            Self::Infraction(i) => i.revision,
            Self::Ticket(t) => t.revision,
            Self::Payment(p) => p.revision,
            Self::Appeal(a) => a.revision,
        }
    }

    pub fn set_revision(&mut self, revision: u64) {
        match self {
            Self::InfractionType(t) => t.revision = revision,
            Self::Infraction(i) => i.revision = revision,
            Self::Ticket(t) => t.revision = revision,
            Self::Payment(p) => p.revision = revision,
            Self::Appeal(a) => a.revision = revision,
        }
    }
}

macro_rules! record_from {
    ($($variant:ident),*) => {
        $(impl From<$variant> for Record {
            fn from(value: $variant) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

record_from!(InfractionType, Infraction, Ticket, Payment, Appeal);

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Record),
    /// The record carries the revision it was read at.
    Update(Record),
    Delete {
        key: RecordKey,
        expected_revision: u64,
    },
}

/// A set of writes applied all-or-nothing by [`UnitOfWork::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, record: impl Into<Record>) -> Self {
        self.changes.push(Change::Insert(record.into()));
        self
    }

    pub fn update(mut self, record: impl Into<Record>) -> Self {
        self.changes.push(Change::Update(record.into()));
        self
    }

    pub fn delete(mut self, key: RecordKey, expected_revision: u64) -> Self {
        self.changes.push(Change::Delete {
            key,
            expected_revision,
        });
        self
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Atomic write path shared by every store port.
///
/// Implementations check every expected revision under a single lock and reject the whole set
/// with `AlreadyProcessed` on any mismatch. Inserts must not collide with an existing key or
/// natural key. Each written record gets its revision incremented.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

#[async_trait]
pub trait InfractionTypeStore: UnitOfWork {
    async fn get(&self, code: &str) -> Result<Option<InfractionType>>;
    async fn list(&self) -> Result<Vec<InfractionType>>;

    async fn create(&self, kind: InfractionType) -> Result<()> {
        self.commit(ChangeSet::new().insert(kind)).await
    }

    async fn update(&self, kind: InfractionType) -> Result<()> {
        self.commit(ChangeSet::new().update(kind)).await
    }
}

#[async_trait]
pub trait InfractionStore: UnitOfWork {
    async fn get(&self, id: InfractionId) -> Result<Option<Infraction>>;
    async fn list(&self, filter: &InfractionFilter) -> Result<Vec<Infraction>>;

    async fn find_by_ticket(&self, ticket_id: TicketId) -> Result<Vec<Infraction>> {
        let filter = InfractionFilter {
            ticket_id: Some(ticket_id),
            ..InfractionFilter::default()
        };
        self.list(&filter).await
    }

    async fn create(&self, infraction: Infraction) -> Result<()> {
        self.commit(ChangeSet::new().insert(infraction)).await
    }

    async fn update(&self, infraction: Infraction) -> Result<()> {
        self.commit(ChangeSet::new().update(infraction)).await
    }

    async fn delete(&self, id: InfractionId, expected_revision: u64) -> Result<()> {
        self.commit(ChangeSet::new().delete(RecordKey::Infraction(id), expected_revision))
            .await
    }
}

#[async_trait]
pub trait TicketStore: UnitOfWork {
    async fn get(&self, id: TicketId) -> Result<Option<Ticket>>;
    async fn get_by_number(&self, numero_pv: &str) -> Result<Option<Ticket>>;
    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>>;

    async fn create(&self, ticket: Ticket) -> Result<()> {
        self.commit(ChangeSet::new().insert(ticket)).await
    }

    async fn update(&self, ticket: Ticket) -> Result<()> {
        self.commit(ChangeSet::new().update(ticket)).await
    }

    async fn delete(&self, id: TicketId, expected_revision: u64) -> Result<()> {
        self.commit(ChangeSet::new().delete(RecordKey::Ticket(id), expected_revision))
            .await
    }
}

#[async_trait]
pub trait PaymentStore: UnitOfWork {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn get_by_number(&self, numero_transaction: &str) -> Result<Option<Payment>>;
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;

    async fn find_by_ticket(&self, ticket_id: TicketId) -> Result<Vec<Payment>> {
        let filter = PaymentFilter {
            ticket_id: Some(ticket_id),
            ..PaymentFilter::default()
        };
        self.list(&filter).await
    }

    async fn create(&self, payment: Payment) -> Result<()> {
        self.commit(ChangeSet::new().insert(payment)).await
    }

    async fn update(&self, payment: Payment) -> Result<()> {
        self.commit(ChangeSet::new().update(payment)).await
    }

    async fn delete(&self, id: PaymentId, expected_revision: u64) -> Result<()> {
        self.commit(ChangeSet::new().delete(RecordKey::Payment(id), expected_revision))
            .await
    }
}

#[async_trait]
pub trait AppealStore: UnitOfWork {
    async fn get(&self, id: AppealId) -> Result<Option<Appeal>>;
    async fn get_by_number(&self, numero_recours: &str) -> Result<Option<Appeal>>;
    async fn list(&self, filter: &AppealFilter) -> Result<Vec<Appeal>>;

    async fn find_by_ticket(&self, ticket_id: TicketId) -> Result<Vec<Appeal>> {
        let filter = AppealFilter {
            ticket_id: Some(ticket_id),
            ..AppealFilter::default()
        };
        self.list(&filter).await
    }

    async fn create(&self, appeal: Appeal) -> Result<()> {
        self.commit(ChangeSet::new().insert(appeal)).await
    }

    async fn update(&self, appeal: Appeal) -> Result<()> {
        self.commit(ChangeSet::new().update(appeal)).await
    }

    async fn delete(&self, id: AppealId, expected_revision: u64) -> Result<()> {
        self.commit(ChangeSet::new().delete(RecordKey::Appeal(id), expected_revision))
            .await
    }
}

pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;
pub type InfractionTypeStoreRef = Arc<dyn InfractionTypeStore>;
pub type InfractionStoreRef = Arc<dyn InfractionStore>;
pub type TicketStoreRef = Arc<dyn TicketStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type AppealStoreRef = Arc<dyn AppealStore>;

/// Every port backed by one storage engine, so cross-entity change sets stay atomic.
pub trait Backend:
    InfractionTypeStore + InfractionStore + TicketStore + PaymentStore + AppealStore
{
}

impl<T> Backend for T where
    T: InfractionTypeStore + InfractionStore + TicketStore + PaymentStore + AppealStore
{
}
