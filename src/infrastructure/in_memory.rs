use crate::domain::appeal::{Appeal, AppealFilter};
use crate::domain::fine::InfractionType;
use crate::domain::ids::{AppealId, InfractionId, PaymentId, TicketId};
use crate::domain::infraction::{Infraction, InfractionFilter};
use crate::domain::payment::{Payment, PaymentFilter};
use crate::domain::ports::{
    AppealStore, Change, ChangeSet, InfractionStore, InfractionTypeStore, PaymentStore, Record,
    RecordKey, TicketStore, UnitOfWork,
};
use crate::domain::ticket::{Ticket, TicketFilter};
use crate::error::{LifecycleError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct Tables {
    records: HashMap<RecordKey, Record>,
    /// Natural key (PV, transaction or appeal number) to record key.
    numbers: HashMap<String, RecordKey>,
}

/// Keys and numbers claimed by earlier inserts of the change set being checked.
#[derive(Default)]
struct Pending {
    keys: HashSet<RecordKey>,
    numbers: HashSet<String>,
}

impl Pending {
    fn claim(&mut self, record: &Record) {
        self.keys.insert(record.key());
        if let Some(number) = record.natural_key() {
            self.numbers.insert(number.to_string());
        }
    }
}

impl Tables {
    fn check(&self, change: &Change, pending: &Pending) -> Result<()> {
        match change {
            Change::Insert(record) => {
                let key = record.key();
                if self.records.contains_key(&key) || pending.keys.contains(&key) {
                    return Err(LifecycleError::storage(format!("{key} already exists")));
                }
                if let Some(number) = record.natural_key()
                    && (self.numbers.contains_key(number) || pending.numbers.contains(number))
                {
                    return Err(LifecycleError::storage(format!(
                        "number {number} already exists"
                    )));
                }
                Ok(())
            }
            Change::Update(record) => self.expect_revision(&record.key(), record.revision()),
            Change::Delete {
                key,
                expected_revision,
            } => self.expect_revision(key, *expected_revision),
        }
    }

    fn expect_revision(&self, key: &RecordKey, expected: u64) -> Result<()> {
        match self.records.get(key) {
            None => Err(LifecycleError::not_found("record", key)),
            Some(current) if current.revision() != expected => Err(
                LifecycleError::AlreadyProcessed(format!("{key} was modified concurrently")),
            ),
            Some(_) => Ok(()),
        }
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Insert(mut record) | Change::Update(mut record) => {
                record.set_revision(record.revision() + 1);
                if let Some(number) = record.natural_key() {
                    self.numbers.insert(number.to_string(), record.key());
                }
                self.records.insert(record.key(), record);
            }
            Change::Delete { key, .. } => {
                if let Some(record) = self.records.remove(&key)
                    && let Some(number) = record.natural_key()
                {
                    self.numbers.remove(number);
                }
            }
        }
    }
}

/// A thread-safe in-memory backend implementing every store port.
///
/// All entities live behind one `Arc<RwLock<..>>`, so a [`ChangeSet`] is validated and applied
/// under a single write lock.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find<T>(&self, key: RecordKey, pick: impl Fn(&Record) -> Option<&T>) -> Option<T>
    where
        T: Clone,
    {
        let tables = self.tables.read().await;
        tables.records.get(&key).and_then(pick).cloned()
    }

    async fn find_by_number<T>(
        &self,
        number: &str,
        pick: impl Fn(&Record) -> Option<&T>,
    ) -> Option<T>
    where
        T: Clone,
    {
        let tables = self.tables.read().await;
        tables
            .numbers
            .get(number)
            .and_then(|key| tables.records.get(key))
            .and_then(pick)
            .cloned()
    }

    async fn collect<T>(&self, pick: impl Fn(&Record) -> Option<&T>) -> Vec<T>
    where
        T: Clone,
    {
        let tables = self.tables.read().await;
        tables.records.values().filter_map(pick).cloned().collect()
    }
}

fn as_type(record: &Record) -> Option<&InfractionType> {
    match record {
        Record::InfractionType(t) => Some(t),
        _ => None,
    }
}

fn as_infraction(record: &Record) -> Option<&Infraction> {
    match record {
        Record::Infraction(i) => Some(i),
        _ => None,
    }
}

fn as_ticket(record: &Record) -> Option<&Ticket> {
    match record {
        Record::Ticket(t) => Some(t),
        _ => None,
    }
}

fn as_payment(record: &Record) -> Option<&Payment> {
    match record {
        Record::Payment(p) => Some(p),
        _ => None,
    }
}

fn as_appeal(record: &Record) -> Option<&Appeal> {
    match record {
        Record::Appeal(a) => Some(a),
        _ => None,
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut pending = Pending::default();
        for change in changes.changes() {
            tables.check(change, &pending)?;
            if let Change::Insert(record) = change {
                pending.claim(record);
            }
        }
        for change in changes {
            tables.apply(change);
        }
        Ok(())
    }
}

#[async_trait]
impl InfractionTypeStore for InMemoryStore {
    async fn get(&self, code: &str) -> Result<Option<InfractionType>> {
        Ok(self
            .find(RecordKey::InfractionType(code.to_string()), as_type)
            .await)
    }

    async fn list(&self) -> Result<Vec<InfractionType>> {
        let mut types = self.collect(as_type).await;
        types.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(types)
    }
}

#[async_trait]
impl InfractionStore for InMemoryStore {
    async fn get(&self, id: InfractionId) -> Result<Option<Infraction>> {
        Ok(self.find(RecordKey::Infraction(id), as_infraction).await)
    }

    async fn list(&self, filter: &InfractionFilter) -> Result<Vec<Infraction>> {
        let mut found: Vec<_> = self
            .collect(as_infraction)
            .await
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        found.sort_by_key(|i| (i.date_infraction, i.id));
        Ok(found)
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn get(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.find(RecordKey::Ticket(id), as_ticket).await)
    }

    async fn get_by_number(&self, numero_pv: &str) -> Result<Option<Ticket>> {
        Ok(self.find_by_number(numero_pv, as_ticket).await)
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut found: Vec<_> = self
            .collect(as_ticket)
            .await
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        found.sort_by(|a, b| {
            a.date_emission
                .cmp(&b.date_emission)
                .then(a.numero_pv.cmp(&b.numero_pv))
        });
        Ok(found)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.find(RecordKey::Payment(id), as_payment).await)
    }

    async fn get_by_number(&self, numero_transaction: &str) -> Result<Option<Payment>> {
        Ok(self.find_by_number(numero_transaction, as_payment).await)
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let mut found: Vec<_> = self
            .collect(as_payment)
            .await
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        found.sort_by(|a, b| {
            a.date_paiement
                .cmp(&b.date_paiement)
                .then(a.numero_transaction.cmp(&b.numero_transaction))
        });
        Ok(found)
    }
}

#[async_trait]
impl AppealStore for InMemoryStore {
    async fn get(&self, id: AppealId) -> Result<Option<Appeal>> {
        Ok(self.find(RecordKey::Appeal(id), as_appeal).await)
    }

    async fn get_by_number(&self, numero_recours: &str) -> Result<Option<Appeal>> {
        Ok(self.find_by_number(numero_recours, as_appeal).await)
    }

    async fn list(&self, filter: &AppealFilter) -> Result<Vec<Appeal>> {
        let mut found: Vec<_> = self
            .collect(as_appeal)
            .await
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        found.sort_by(|a, b| {
            a.date_recours
                .cmp(&b.date_recours)
                .then(a.numero_recours.cmp(&b.numero_recours))
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::ticket::NewTicket;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn kind(code: &str) -> InfractionType {
        InfractionType::new(code, "Feu rouge", Money::new(dec!(135)), 4, "SIGNALISATION")
    }

    fn ticket(numero_pv: &str) -> Ticket {
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 8, 30, 0).unwrap();
        let request = NewTicket {
            infraction_ids: vec![InfractionId::new()],
            montant_total: Money::new(dec!(135)),
            date_limite_paiement: None,
            observations: None,
        };
        Ticket::issue(request, numero_pv.to_string(), 45, now).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_number_within_change_set_rejected() {
        let store = InMemoryStore::new();
        let first = ticket("PV-20250106-0000AAAA");
        let second = ticket("PV-20250106-0000AAAA");

        let result = store
            .commit(ChangeSet::new().insert(first.clone()).insert(second))
            .await;

        assert!(matches!(result, Err(LifecycleError::StorageError(_))));
        assert!(TicketStore::get(&store, first.id).await.unwrap().is_none());
        assert!(
            TicketStore::get_by_number(&store, "PV-20250106-0000AAAA")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_insert_bumps_revision() {
        let store = InMemoryStore::new();
        InfractionTypeStore::create(&store, kind("FEU-01")).await.unwrap();

        let stored = InfractionTypeStore::get(&store, "FEU-01").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert!(InfractionTypeStore::get(&store, "FEU-02").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryStore::new();
        InfractionTypeStore::create(&store, kind("FEU-01")).await.unwrap();
        let err = InfractionTypeStore::create(&store, kind("FEU-01"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_revision_rejects_whole_change_set() {
        let store = InMemoryStore::new();
        InfractionTypeStore::create(&store, kind("A")).await.unwrap();
        InfractionTypeStore::create(&store, kind("B")).await.unwrap();

        let mut a = InfractionTypeStore::get(&store, "A").await.unwrap().unwrap();
        let mut b = InfractionTypeStore::get(&store, "B").await.unwrap().unwrap();
        a.active = false;
        b.active = false;
        b.revision = 0;

        let result = store.commit(ChangeSet::new().update(a).update(b)).await;
        assert!(matches!(result, Err(LifecycleError::AlreadyProcessed(_))));

        let a = InfractionTypeStore::get(&store, "A").await.unwrap().unwrap();
        assert!(a.active);
        assert_eq!(a.revision, 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_record_is_not_found() {
        let store = InMemoryStore::new();
        let result = InfractionTypeStore::update(&store, kind("X")).await;
        assert!(matches!(result, Err(LifecycleError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = InMemoryStore::new();
        for code in ["C", "A", "B"] {
            InfractionTypeStore::create(&store, kind(code)).await.unwrap();
        }
        let codes: Vec<_> = InfractionTypeStore::list(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.code)
            .collect();
        assert_eq!(codes, ["A", "B", "C"]);
    }
}
