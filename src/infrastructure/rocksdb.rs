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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_INFRACTION_TYPES: &str = "infraction_types";
pub const CF_INFRACTIONS: &str = "infractions";
pub const CF_TICKETS: &str = "tickets";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_APPEALS: &str = "appeals";
/// Natural key (PV, transaction or appeal number) to record id.
pub const CF_NUMBERS: &str = "numbers";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_INFRACTION_TYPES,
    CF_INFRACTIONS,
    CF_TICKETS,
    CF_PAYMENTS,
    CF_APPEALS,
    CF_NUMBERS,
];

/// A persistent backend using RocksDB, one column family per entity.
///
/// Records are stored as JSON. A [`ChangeSet`] is checked and written as a single
/// `WriteBatch` while holding the commit lock, so concurrent commits are serialized.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

fn location(key: &RecordKey) -> (&'static str, Vec<u8>) {
    match key {
        RecordKey::InfractionType(code) => (CF_INFRACTION_TYPES, code.as_bytes().to_vec()),
        RecordKey::Infraction(id) => (CF_INFRACTIONS, id.to_string().into_bytes()),
        RecordKey::Ticket(id) => (CF_TICKETS, id.to_string().into_bytes()),
        RecordKey::Payment(id) => (CF_PAYMENTS, id.to_string().into_bytes()),
        RecordKey::Appeal(id) => (CF_APPEALS, id.to_string().into_bytes()),
    }
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LifecycleError::storage(format!("{name} column family not found")))
    }

    fn load(&self, key: &RecordKey) -> Result<Option<Record>> {
        let (name, id) = location(key);
        match self.db.get_cf(self.cf(name)?, id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_by_number(&self, number: &str) -> Result<Option<Record>> {
        let Some(bytes) = self.db.get_cf(self.cf(CF_NUMBERS)?, number.as_bytes())? else {
            return Ok(None);
        };
        let key: StoredKey = serde_json::from_slice(&bytes)?;
        self.load(&key.into())
    }

    fn scan(&self, name: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(name)?, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn expect_revision(&self, key: &RecordKey, expected: u64) -> Result<Record> {
        match self.load(key)? {
            None => Err(LifecycleError::not_found("record", key)),
            Some(current) if current.revision() != expected => Err(
                LifecycleError::AlreadyProcessed(format!("{key} was modified concurrently")),
            ),
            Some(current) => Ok(current),
        }
    }

    fn put(&self, batch: &mut WriteBatch, mut record: Record) -> Result<()> {
        record.set_revision(record.revision() + 1);
        let key = record.key();
        let (name, id) = location(&key);
        batch.put_cf(self.cf(name)?, id, serde_json::to_vec(&record)?);
        if let (Some(number), Some(target)) = (record.natural_key(), StoredKey::of(&key)) {
            batch.put_cf(
                self.cf(CF_NUMBERS)?,
                number.as_bytes(),
                serde_json::to_vec(&target)?,
            );
        }
        Ok(())
    }

    fn prepare(&self, changes: ChangeSet) -> Result<WriteBatch> {
        let mut batch = WriteBatch::default();
        let mut inserted = HashSet::new();
        let mut numbers = HashSet::new();
        for change in changes {
            match change {
                Change::Insert(record) => {
                    let key = record.key();
                    if inserted.contains(&key) || self.load(&key)?.is_some() {
                        return Err(LifecycleError::storage(format!("{key} already exists")));
                    }
                    if let Some(number) = record.natural_key() {
                        if numbers.contains(number) || self.load_by_number(number)?.is_some() {
                            return Err(LifecycleError::storage(format!(
                                "number {number} already exists"
                            )));
                        }
                        numbers.insert(number.to_string());
                    }
                    inserted.insert(key);
                    self.put(&mut batch, record)?;
                }
                Change::Update(record) => {
                    self.expect_revision(&record.key(), record.revision())?;
                    self.put(&mut batch, record)?;
                }
                Change::Delete {
                    key,
                    expected_revision,
                } => {
                    let current = self.expect_revision(&key, expected_revision)?;
                    let (name, id) = location(&key);
                    batch.delete_cf(self.cf(name)?, id);
                    if let Some(number) = current.natural_key() {
                        batch.delete_cf(self.cf(CF_NUMBERS)?, number.as_bytes());
                    }
                }
            }
        }
        Ok(batch)
    }
}

/// Target of a natural key in the numbers column family.
#[derive(serde::Serialize, serde::Deserialize)]
enum StoredKey {
    Ticket(TicketId),
    Payment(PaymentId),
    Appeal(AppealId),
}

impl StoredKey {
    fn of(key: &RecordKey) -> Option<Self> {
        match key {
            RecordKey::Ticket(id) => Some(Self::Ticket(*id)),
            RecordKey::Payment(id) => Some(Self::Payment(*id)),
            RecordKey::Appeal(id) => Some(Self::Appeal(*id)),
            RecordKey::InfractionType(_) | RecordKey::Infraction(_) => None,
        }
    }
}

impl From<StoredKey> for RecordKey {
    fn from(key: StoredKey) -> Self {
        match key {
            StoredKey::Ticket(id) => Self::Ticket(id),
            StoredKey::Payment(id) => Self::Payment(id),
            StoredKey::Appeal(id) => Self::Appeal(id),
        }
    }
}

#[async_trait]
impl UnitOfWork for RocksDBStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let batch = self.prepare(changes)?;
        self.db.write(batch)?;
        Ok(())
    }
}

macro_rules! variants {
    ($records:expr, $variant:ident) => {
        $records
            .into_iter()
            .filter_map(|record| match record {
                Record::$variant(value) => Some(value),
                _ => None,
            })
    };
}

#[async_trait]
impl InfractionTypeStore for RocksDBStore {
    async fn get(&self, code: &str) -> Result<Option<InfractionType>> {
        let record = self.load(&RecordKey::InfractionType(code.to_string()))?;
        Ok(variants!(record, InfractionType).next())
    }

    async fn list(&self) -> Result<Vec<InfractionType>> {
        Ok(variants!(self.scan(CF_INFRACTION_TYPES)?, InfractionType).collect())
    }
}

#[async_trait]
impl InfractionStore for RocksDBStore {
    async fn get(&self, id: InfractionId) -> Result<Option<Infraction>> {
        let record = self.load(&RecordKey::Infraction(id))?;
        Ok(variants!(record, Infraction).next())
    }

    async fn list(&self, filter: &InfractionFilter) -> Result<Vec<Infraction>> {
        let mut found: Vec<_> = variants!(self.scan(CF_INFRACTIONS)?, Infraction)
            .filter(|i| filter.matches(i))
            .collect();
        found.sort_by_key(|i| (i.date_infraction, i.id));
        Ok(found)
    }
}

#[async_trait]
impl TicketStore for RocksDBStore {
    async fn get(&self, id: TicketId) -> Result<Option<Ticket>> {
        let record = self.load(&RecordKey::Ticket(id))?;
        Ok(variants!(record, Ticket).next())
    }

    async fn get_by_number(&self, numero_pv: &str) -> Result<Option<Ticket>> {
        Ok(variants!(self.load_by_number(numero_pv)?, Ticket).next())
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut found: Vec<_> = variants!(self.scan(CF_TICKETS)?, Ticket)
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
impl PaymentStore for RocksDBStore {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let record = self.load(&RecordKey::Payment(id))?;
        Ok(variants!(record, Payment).next())
    }

    async fn get_by_number(&self, numero_transaction: &str) -> Result<Option<Payment>> {
        Ok(variants!(self.load_by_number(numero_transaction)?, Payment).next())
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let mut found: Vec<_> = variants!(self.scan(CF_PAYMENTS)?, Payment)
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
impl AppealStore for RocksDBStore {
    async fn get(&self, id: AppealId) -> Result<Option<Appeal>> {
        let record = self.load(&RecordKey::Appeal(id))?;
        Ok(variants!(record, Appeal).next())
    }

    async fn get_by_number(&self, numero_recours: &str) -> Result<Option<Appeal>> {
        Ok(variants!(self.load_by_number(numero_recours)?, Appeal).next())
    }

    async fn list(&self, filter: &AppealFilter) -> Result<Vec<Appeal>> {
        let mut found: Vec<_> = variants!(self.scan(CF_APPEALS)?, Appeal)
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
    use tempfile::tempdir;

    fn kind(code: &str) -> InfractionType {
        InfractionType::new(code, "Défaut de ceinture", Money::new(dec!(135)), 3, "SECURITE")
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_revisions_and_conflicts() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        InfractionTypeStore::create(&store, kind("CEIN-01")).await.unwrap();
        let mut stored = InfractionTypeStore::get(&store, "CEIN-01").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);

        let stale = stored.clone();
        stored.active = false;
        InfractionTypeStore::update(&store, stored).await.unwrap();

        let result = InfractionTypeStore::update(&store, stale).await;
        assert!(matches!(result, Err(LifecycleError::AlreadyProcessed(_))));

        let current = InfractionTypeStore::get(&store, "CEIN-01").await.unwrap().unwrap();
        assert!(!current.active);
        assert_eq!(current.revision, 2);
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            InfractionTypeStore::create(&store, kind("CEIN-01")).await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        let types = InfractionTypeStore::list(&store).await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].code, "CEIN-01");
    }

    #[tokio::test]
    async fn test_rocksdb_duplicate_number_in_one_batch() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 8, 30, 0).unwrap();
        let issue = || {
            let request = NewTicket {
                infraction_ids: vec![InfractionId::new()],
                montant_total: Money::new(dec!(135)),
                date_limite_paiement: None,
                observations: None,
            };
            Ticket::issue(request, "PV-20250106-0000BBBB".to_string(), 45, now).unwrap()
        };
        let first = issue();

        let result = store
            .commit(ChangeSet::new().insert(first.clone()).insert(issue()))
            .await;

        assert!(matches!(result, Err(LifecycleError::StorageError(_))));
        assert!(TicketStore::get(&store, first.id).await.unwrap().is_none());
        assert!(
            TicketStore::get_by_number(&store, "PV-20250106-0000BBBB")
                .await
                .unwrap()
                .is_none()
        );
    }
}
