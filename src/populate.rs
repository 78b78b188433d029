//! Calibration dataset population
//!
//! Both collections hold exactly `cardinality` documents. The scan collection
//! is read wholesale; the lookup collection carries a uniquely indexed field
//! whose values run from 1 to `cardinality`, so every evenly spaced key the
//! random phase picks exists exactly once.

use serde_json::{json, Value};
use tracing::info;

use crate::config::ProtocolConfig;
use crate::error::{CalibrationError, Result};
use crate::handle::DatabaseHandle;

/// What the populator must produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub cardinality: u64,
    pub scan_collection: String,
    pub lookup_collection: String,
    pub lookup_field: String,
    pub batch_size: u64,
}

impl DatasetSpec {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            cardinality: config.cardinality,
            scan_collection: config.scan_collection.clone(),
            lookup_collection: config.lookup_collection.clone(),
            lookup_field: config.lookup_field.clone(),
            batch_size: config.populate_batch,
        }
    }
}

/// Fills the calibration collections with an exact, known cardinality
pub trait DatasetPopulator {
    fn populate(&self, db: &DatabaseHandle, spec: &DatasetSpec) -> Result<()>;
}

/// Populates through server-side aggregation, one `$merge` per batch
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandPopulator;

impl CommandPopulator {
    /// Aggregation that generates documents `[start, end)` into `collection`
    pub fn batch_command(collection: &str, lookup_field: Option<&str>, start: u64, end: u64) -> Value {
        let mut document = json!({
            "_id": "$$i",
            "payload": { "$concat": ["row-", { "$toString": "$$i" }] },
        });
        if let Some(field) = lookup_field {
            document[field] = json!({ "$add": ["$$i", 1] });
        }

        json!({
            "aggregate": 1,
            "pipeline": [
                { "$documents": {
                    "$map": { "input": { "$range": [start, end] }, "as": "i", "in": document }
                } },
                { "$merge": { "into": collection, "whenMatched": "fail", "whenNotMatched": "insert" } },
            ],
            "cursor": {},
        })
    }

    fn fill(
        &self,
        db: &DatabaseHandle,
        collection: &str,
        lookup_field: Option<&str>,
        spec: &DatasetSpec,
    ) -> Result<()> {
        match db.run_command(&json!({ "drop": collection })) {
            Ok(_) => {}
            // Dropping a collection that does not exist yet
            Err(CalibrationError::Client(e)) if e.to_string().contains("ns not found") => {}
            Err(e) => return Err(e),
        }

        let mut start = 0;
        while start < spec.cardinality {
            let end = (start + spec.batch_size).min(spec.cardinality);
            db.run_command(&Self::batch_command(collection, lookup_field, start, end))?;
            start = end;
        }

        if let Some(field) = lookup_field {
            db.run_command(&json!({
                "createIndexes": collection,
                "indexes": [{ "key": { field: 1 }, "name": format!("{field}_1"), "unique": true }],
            }))?;
        }

        let count = db
            .run_command(&json!({ "count": collection }))?
            .get("n")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if count != spec.cardinality {
            return Err(CalibrationError::Precondition(format!(
                "{} holds {} documents, expected {}",
                collection, count, spec.cardinality
            )));
        }
        info!(collection, count, "Collection populated");
        Ok(())
    }
}

impl DatasetPopulator for CommandPopulator {
    fn populate(&self, db: &DatabaseHandle, spec: &DatasetSpec) -> Result<()> {
        self.fill(db, &spec.scan_collection, None, spec)?;
        self.fill(db, &spec.lookup_collection, Some(&spec.lookup_field), spec)
    }
}
