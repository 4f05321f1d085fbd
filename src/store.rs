use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RegistrationError, StoreError};
use crate::matching::{Dedup, IdentityKey};
use crate::models::FixtureRecord;
use crate::registration::Registrar;
use crate::size::SizeParser;

/// A registered inventory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub fixture: FixtureRecord,
    pub dedup_key: String,
    pub stock: i64,
    pub registered_at: DateTime<Utc>,
}

/// Reference inventory master, SQLite-backed.
///
/// Every row carries its dedup identity key under a UNIQUE constraint, so the
/// database itself refuses a second copy of the same item. The connection
/// sits behind a mutex so the store can serve as a [`Registrar`] for
/// concurrent registration workers.
pub struct InventoryStore {
    conn: Mutex<Connection>,
    parser: SizeParser,
}

impl InventoryStore {
    /// Create a store backed by an in-memory SQLite database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Create a store backed by a file-based SQLite database.
    pub fn persistent(path: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            parser: SizeParser::default_parser().clone(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Use custom notation rules for dedup keys of items added from now on.
    pub fn with_parser(mut self, parser: SizeParser) -> Self {
        self.parser = parser;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS inventory_items (
                id TEXT PRIMARY KEY,
                manufacturer TEXT NOT NULL,
                brand TEXT NOT NULL,
                size TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                stock INTEGER NOT NULL DEFAULT 0,
                registered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_manufacturer ON inventory_items(manufacturer);
            CREATE INDEX IF NOT EXISTS idx_items_registered ON inventory_items(registered_at);
            ",
        )?;
        debug!("inventory schema ready");
        Ok(())
    }

    /// Insert a new item. Fails with [`StoreError::Duplicate`] when an item
    /// with the same dedup key exists.
    pub fn add_item(&self, fixture: &FixtureRecord) -> Result<InventoryItem, StoreError> {
        let key = IdentityKey::<Dedup>::for_fixture(&self.parser, fixture);
        let item = InventoryItem {
            id: Uuid::new_v4().to_string(),
            fixture: fixture.clone(),
            dedup_key: key.to_string(),
            stock: 0,
            registered_at: Utc::now(),
        };

        let inserted = self.conn()?.execute(
            "INSERT INTO inventory_items (id, manufacturer, brand, size, dedup_key, stock, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.id,
                item.fixture.manufacturer,
                item.fixture.brand,
                item.fixture.size,
                item.dedup_key,
                item.stock,
                item.registered_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {
                debug!(key = %item.dedup_key, "inventory item added");
                Ok(item)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(item.dedup_key))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All items, oldest first.
    pub fn list_items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, manufacturer, brand, size, dedup_key, stock, registered_at
             FROM inventory_items
             ORDER BY registered_at ASC, id ASC",
        )?;

        let items = stmt
            .query_map([], |row| Ok(row_to_item(row)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(items)
    }

    /// Snapshot of the manufacturer/brand/size triples, for analysis runs.
    pub fn records(&self) -> Result<Vec<FixtureRecord>, StoreError> {
        Ok(self
            .list_items()?
            .into_iter()
            .map(|item| item.fixture)
            .collect())
    }

    pub fn contains(&self, fixture: &FixtureRecord) -> Result<bool, StoreError> {
        let key = IdentityKey::<Dedup>::for_fixture(&self.parser, fixture);
        let found: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM inventory_items WHERE dedup_key = ?1",
            params![key.as_str()],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM inventory_items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Dedup keys of every stored item.
    pub fn dedup_keys(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT dedup_key FROM inventory_items")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    pub fn summary(&self) -> Result<InventorySummary, StoreError> {
        let items = self.list_items()?;

        let mut per_manufacturer: BTreeMap<String, usize> = BTreeMap::new();
        let mut exchange_items = 0;
        for item in &items {
            if item.fixture.is_exchange_category() {
                exchange_items += 1;
            } else {
                *per_manufacturer
                    .entry(item.fixture.manufacturer.clone())
                    .or_default() += 1;
            }
        }

        Ok(InventorySummary {
            total_items: items.len(),
            manufacturer_count: per_manufacturer.len(),
            per_manufacturer,
            exchange_items,
        })
    }

    /// Bulk-load a snapshot, skipping items already present.
    /// Returns how many rows were inserted.
    pub fn import(&self, fixtures: &[FixtureRecord]) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for fixture in fixtures {
            match self.add_item(fixture) {
                Ok(_) => inserted += 1,
                Err(StoreError::Duplicate(_)) => {}
                Err(err) => return Err(err),
            }
        }
        info!(inserted, offered = fixtures.len(), "inventory import complete");
        Ok(inserted)
    }
}

fn row_to_item(row: &rusqlite::Row) -> InventoryItem {
    InventoryItem {
        id: row.get(0).unwrap_or_default(),
        fixture: FixtureRecord {
            manufacturer: row.get(1).unwrap_or_default(),
            brand: row.get(2).unwrap_or_default(),
            size: row.get(3).unwrap_or_default(),
        },
        dedup_key: row.get(4).unwrap_or_default(),
        stock: row.get(5).unwrap_or(0),
        registered_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl Registrar for InventoryStore {
    async fn register(&self, item: &FixtureRecord) -> Result<(), RegistrationError> {
        self.add_item(item)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InventorySummary {
    pub total_items: usize,
    pub manufacturer_count: usize,

    /// Item count per manufacturer spelling, exchange items excluded
    pub per_manufacturer: BTreeMap<String, usize>,
    pub exchange_items: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RegistrationConfig;
    use crate::registration::run_bounded_registration;

    fn make_store() -> InventoryStore {
        InventoryStore::in_memory().unwrap()
    }

    #[test]
    fn test_add_and_list() {
        let store = make_store();
        store
            .add_item(&FixtureRecord::new("IBS", "Magicore", "C4 Φ3.5 X 11"))
            .unwrap();

        let items = store.list_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].fixture.manufacturer, "IBS");
        assert_eq!(items[0].dedup_key, "ibs|magicore|d3.5_l11_c4");
    }

    #[test]
    fn test_duplicate_rejected_across_notations() {
        let store = make_store();
        store
            .add_item(&FixtureRecord::new("IBS", "BrandX", "Φ4 X 10"))
            .unwrap();

        let err = store
            .add_item(&FixtureRecord::new("ibs", "Brand X", "D:4.0 L:10"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_exchange_category_is_distinct() {
        let store = make_store();
        let item = FixtureRecord::new("IBS", "BrandX", "Φ4 X 10");
        store.add_item(&item).unwrap();
        store.add_item(&item.exchange_counterpart()).unwrap();

        assert_eq!(store.count().unwrap(), 2);
        assert!(store.contains(&item).unwrap());
        let summary = store.summary().unwrap();
        assert_eq!(summary.exchange_items, 1);
        assert_eq!(summary.manufacturer_count, 1);
        assert_eq!(summary.per_manufacturer.get("IBS"), Some(&1));
        assert_eq!(store.dedup_keys().unwrap().len(), 2);
    }

    #[test]
    fn test_import_skips_duplicates() {
        let store = make_store();
        let fixtures = vec![
            FixtureRecord::new("Dentium", "SuperLine", "3507"),
            FixtureRecord::new("Dentium", "SuperLine", "Φ3.5 X 7"),
            FixtureRecord::new("Dentium", "SuperLine", "4510"),
        ];
        assert_eq!(store.import(&fixtures).unwrap(), 2);
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_persistent_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.db");
        let path = path.to_str().unwrap();

        {
            let store = InventoryStore::persistent(path).unwrap();
            store
                .add_item(&FixtureRecord::new("Osstem", "TS III", "Φ4.0 X 10"))
                .unwrap();
        }

        let reopened = InventoryStore::persistent(path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert!(reopened
            .contains(&FixtureRecord::new("OSSTEM", "TSIII", "Φ4 x 10"))
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounded_registration_into_store() {
        let store = Arc::new(make_store());
        let existing = FixtureRecord::new("IBS", "Magicore", "C4 Φ3.5 X 11");
        store.add_item(&existing).unwrap();

        let queue = vec![
            existing.clone(),
            FixtureRecord::new("IBS", "Magicore", "C3 Φ4 X 10"),
            FixtureRecord::new("IBS", "Magicore", "D:4 L:10 Cuff:3"),
            FixtureRecord::new("IBS", "Magicore", "C2 Φ4.5 X 8.5"),
        ];
        let inventory = store.records().unwrap();

        let report = run_bounded_registration(
            queue,
            &inventory,
            Arc::clone(&store),
            RegistrationConfig::default(),
            |_, _| {},
        )
        .await;

        assert!(report.failed.is_empty());
        // existing pair + two new sizes with their pairs
        assert_eq!(report.inserted.len(), 5);
        assert_eq!(store.count().unwrap(), 6);
        assert_eq!(report.keys.len(), 6);
    }
}
