//! In-process adapter.
//!
//! `MemoryAdapter` keeps every table as a vector of column-named records
//! behind a lock. It supports auto-increment primary keys, unique columns and,
//! when enabled, native joins. Every call is appended to a [`CallLog`] that
//! can be shared between adapters to observe dispatch order across
//! datastores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ormweave_proto::{Criteria, Join, Method, Record, Stage3Query};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use super::{Adapter, AdapterError, AdapterResult};
use crate::ontology::Ontology;
use crate::query::cache::CacheBuilder;
use crate::query::filter::FilterEvaluator;
use crate::query::integrator::integrate;
use crate::query::rows::{paginate, project, sort_records};

/// Physical description of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub primary_key: String,
    pub auto_increment: bool,
    pub unique: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            auto_increment: false,
            unique: Vec::new(),
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }
}

/// One dispatched adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Identity of the adapter that served the call.
    pub adapter: String,
    pub method: Method,
    /// `true` when served through [`Adapter::join`].
    pub join: bool,
    pub table: String,
}

/// Shared, ordered log of adapter calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: CallRecord) {
        self.calls.lock().push(call);
    }

    /// Snapshot of the calls so far, in dispatch order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Tables touched so far, in dispatch order.
    pub fn tables(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.table.clone()).collect()
    }

    /// Position of the first call against `table`.
    pub fn position(&self, table: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c.table == table)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug)]
struct Table {
    def: TableDef,
    rows: Vec<Record>,
    next_id: u64,
}

impl Table {
    fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    /// Unique columns, primary key first.
    fn unique_columns(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.def.primary_key).chain(self.def.unique.iter())
    }

    /// Find a unique column whose value in `record` is already taken by one
    /// of `rows` other than `skip`.
    fn conflict(&self, rows: &[Record], record: &Record, skip: Option<usize>) -> Option<String> {
        self.unique_columns()
            .find(|column| {
                let Some(value) = record.get(*column).filter(|v| !v.is_null()) else {
                    return false;
                };
                rows.iter().enumerate().any(|(i, row)| {
                    Some(i) != skip
                        && row
                            .get(*column)
                            .is_some_and(|v| FilterEvaluator::values_equal(v, value))
                })
            })
            .cloned()
    }

    fn assign_primary_key(&mut self, record: &mut Record) {
        let pk = &self.def.primary_key;
        match record.get(pk) {
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_u64() {
                    self.next_id = self.next_id.max(id + 1);
                }
            }
            Some(v) if !v.is_null() => {}
            _ if self.def.auto_increment => {
                record.insert(pk.clone(), Value::from(self.next_id));
                self.next_id += 1;
            }
            _ => {}
        }
    }

    fn insert(&mut self, mut record: Record) -> AdapterResult<Record> {
        self.assign_primary_key(&mut record);
        if record.get(&self.def.primary_key).map_or(true, Value::is_null) {
            return Err(AdapterError::Backend(format!(
                "missing primary key `{}` for table `{}`",
                self.def.primary_key, self.def.name
            )));
        }
        if let Some(column) = self.conflict(&self.rows, &record, None) {
            return Err(unique_violation(&self.def.name, column));
        }
        self.rows.push(record.clone());
        Ok(record)
    }
}

fn unique_violation(table: &str, column: String) -> AdapterError {
    AdapterError::Unique {
        message: format!("would violate uniqueness of `{table}.{column}`"),
        keys: vec![column],
    }
}

/// In-process adapter backed by vectors of records.
#[derive(Debug)]
pub struct MemoryAdapter {
    identity: String,
    native_join: bool,
    latency: Option<Duration>,
    tables: RwLock<HashMap<String, Table>>,
    log: CallLog,
}

impl MemoryAdapter {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            native_join: false,
            latency: None,
            tables: RwLock::new(HashMap::new()),
            log: CallLog::new(),
        }
    }

    /// Define a table for every model housed on `datastore`.
    pub fn for_datastore(ontology: &Ontology, datastore: &str) -> Self {
        let mut adapter = Self::new(datastore);
        for model in ontology.models().filter(|m| m.datastore == datastore) {
            let pk = model.primary_key_attribute();
            let mut def = TableDef::new(&model.table_name, model.primary_key_column());
            def.auto_increment = pk.is_some_and(|a| a.auto_increment);
            def.unique = model
                .stored_attributes()
                .filter(|a| a.unique && a.name != model.primary_key)
                .map(|a| a.column_name.clone())
                .collect();
            adapter = adapter.with_table(def);
        }
        adapter
    }

    pub fn with_table(self, def: TableDef) -> Self {
        self.tables.write().insert(def.name.clone(), Table::new(def));
        self
    }

    /// Toggle native join support.
    pub fn with_native_join(mut self, enabled: bool) -> Self {
        self.native_join = enabled;
        self
    }

    /// Record calls in a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Delay every read by `latency` before serving it.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    /// Insert raw, column-named rows without going through the ORM.
    pub fn seed(&self, table: &str, rows: Vec<Record>) -> AdapterResult<()> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table)
            .ok_or_else(|| unknown_table(table))?;
        for row in rows {
            table.insert(row)?;
        }
        Ok(())
    }

    /// Every row of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn log_call(&self, method: Method, join: bool, table: &str) {
        debug!(adapter = %self.identity, method = method.as_str(), table, "memory adapter call");
        self.log.push(CallRecord {
            adapter: self.identity.clone(),
            method,
            join,
            table: table.to_string(),
        });
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Rows matching a criteria's where clause, unsorted and unprojected.
    fn matching(&self, table: &str, criteria: &Criteria) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| FilterEvaluator::evaluate(&criteria.where_clause, r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn select(&self, table: &str, criteria: &Criteria) -> Vec<Record> {
        let mut rows = self.matching(table, criteria);
        sort_records(&mut rows, &criteria.sort);
        paginate(&mut rows, criteria.skip, criteria.limit);
        rows.iter()
            .map(|r| project(r, &criteria.select, &criteria.omit))
            .collect()
    }

    fn primary_key(&self, table: &str) -> Option<String> {
        self.tables.read().get(table).map(|t| t.def.primary_key.clone())
    }

    fn numeric_values(&self, query: &Stage3Query) -> AdapterResult<Vec<f64>> {
        let column = query
            .numeric_attr_name
            .as_deref()
            .ok_or_else(|| AdapterError::Backend("missing numeric attribute".into()))?;
        let criteria = query.criteria_or_default();
        Ok(self
            .matching(&query.using, &criteria)
            .iter()
            .filter_map(|r| r.get(column).and_then(Value::as_f64))
            .collect())
    }

    /// Fill a result cache with the whole child table of every leg; the
    /// integrator re-applies each leg's criteria.
    fn join_cache(&self, parent_pk: &str, parents: Vec<Record>, query: &Stage3Query) -> CacheBuilder {
        let cache = CacheBuilder::new(&query.model, parent_pk, parents);
        for join in &query.joins {
            cache.append(join, self.rows(&join.child));
        }
        cache
    }
}

fn unknown_table(table: &str) -> AdapterError {
    AdapterError::Backend(format!("table `{table}` does not exist"))
}

fn required<'q, T>(value: &'q Option<T>, key: &str) -> AdapterResult<&'q T> {
    value
        .as_ref()
        .ok_or_else(|| AdapterError::Backend(format!("query is missing `{key}`")))
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn supports_join(&self) -> bool {
        self.native_join
    }

    async fn find(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        self.log_call(query.method, false, &query.using);
        self.simulate_latency().await;
        Ok(self.select(&query.using, &query.criteria_or_default()))
    }

    async fn join(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        if !self.native_join {
            return Err(AdapterError::Unsupported("join"));
        }
        self.log_call(query.method, true, &query.using);
        self.simulate_latency().await;

        let parents = self.select(&query.using, &query.criteria_or_default());
        let parent_pk = self
            .primary_key(&query.using)
            .ok_or_else(|| unknown_table(&query.using))?;
        let joins: &[Join] = &query.joins;
        Ok(integrate(joins, &self.join_cache(&parent_pk, parents, query).freeze()))
    }

    async fn create(&self, query: &Stage3Query) -> AdapterResult<Record> {
        self.log_call(query.method, false, &query.using);
        let record = required(&query.new_record, "newRecord")?.clone();
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&query.using)
            .ok_or_else(|| unknown_table(&query.using))?;
        table.insert(record)
    }

    async fn create_each(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        self.log_call(query.method, false, &query.using);
        let records = required(&query.new_records, "newRecords")?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&query.using)
            .ok_or_else(|| unknown_table(&query.using))?;

        // All or nothing: roll back to the previous state on the first failure.
        let (rows, next_id) = (table.rows.len(), table.next_id);
        let mut created = Vec::with_capacity(records.len());
        for record in records {
            match table.insert(record.clone()) {
                Ok(r) => created.push(r),
                Err(e) => {
                    table.rows.truncate(rows);
                    table.next_id = next_id;
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    async fn update(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        self.log_call(query.method, false, &query.using);
        let values = required(&query.values_to_set, "valuesToSet")?;
        let criteria = query.criteria_or_default();
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&query.using)
            .ok_or_else(|| unknown_table(&query.using))?;

        let targets: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| FilterEvaluator::evaluate(&criteria.where_clause, r))
            .map(|(i, _)| i)
            .collect();

        let mut rows = table.rows.clone();
        for i in &targets {
            for (column, value) in values {
                rows[*i].insert(column.clone(), value.clone());
            }
        }
        for i in &targets {
            if let Some(column) = table.conflict(&rows, &rows[*i], Some(*i)) {
                return Err(unique_violation(&table.def.name, column));
            }
        }
        let updated = targets.iter().map(|i| rows[*i].clone()).collect();
        table.rows = rows;
        Ok(updated)
    }

    async fn destroy(&self, query: &Stage3Query) -> AdapterResult<Vec<Record>> {
        self.log_call(query.method, false, &query.using);
        let criteria = query.criteria_or_default();
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&query.using)
            .ok_or_else(|| unknown_table(&query.using))?;
        let (destroyed, kept) = std::mem::take(&mut table.rows)
            .into_iter()
            .partition(|r| FilterEvaluator::evaluate(&criteria.where_clause, r));
        table.rows = kept;
        Ok(destroyed)
    }

    async fn count(&self, query: &Stage3Query) -> AdapterResult<u64> {
        self.log_call(query.method, false, &query.using);
        let criteria = query.criteria_or_default();
        Ok(self.matching(&query.using, &criteria).len() as u64)
    }

    async fn sum(&self, query: &Stage3Query) -> AdapterResult<f64> {
        self.log_call(query.method, false, &query.using);
        Ok(self.numeric_values(query)?.iter().sum())
    }

    async fn avg(&self, query: &Stage3Query) -> AdapterResult<f64> {
        self.log_call(query.method, false, &query.using);
        let values = self.numeric_values(query)?;
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }
}
