//! The `Orm` handle and its read methods.

use std::sync::Arc;

use ormweave_core::{
    Adapter, AdapterError, Datastores, Error, ModelDef, Normalizer, Ontology, QueryExecutor,
    Result, Shaper, StageThreeForger, StageTwoForger, Transformer,
};
use ormweave_proto::{
    Criteria, IterateeKind, Method, QueryKey, Record, Stage1Query, Stage2Query, Stage3Query,
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::OrmConfig;

/// Callback a stream hands its records to.
pub enum Iteratee<'f> {
    /// Called once per record.
    EachRecord(Box<dyn FnMut(Record) -> Result<()> + Send + 'f>),
    /// Called once per fetched batch.
    EachBatch(Box<dyn FnMut(Vec<Record>) -> Result<()> + Send + 'f>),
}

impl<'f> Iteratee<'f> {
    pub fn each_record(f: impl FnMut(Record) -> Result<()> + Send + 'f) -> Self {
        Iteratee::EachRecord(Box::new(f))
    }

    pub fn each_batch(f: impl FnMut(Vec<Record>) -> Result<()> + Send + 'f) -> Self {
        Iteratee::EachBatch(Box::new(f))
    }

    pub fn kind(&self) -> IterateeKind {
        match self {
            Iteratee::EachRecord(_) => IterateeKind::EachRecord,
            Iteratee::EachBatch(_) => IterateeKind::EachBatch,
        }
    }

    fn deliver(&mut self, batch: Vec<Record>) -> Result<()> {
        match self {
            Iteratee::EachRecord(f) => batch.into_iter().try_for_each(|record| f(record)),
            Iteratee::EachBatch(f) => f(batch),
        }
    }
}

/// Builder for [`Orm`].
#[derive(Debug)]
pub struct OrmBuilder {
    ontology: Ontology,
    datastores: Datastores,
    config: OrmConfig,
}

impl OrmBuilder {
    /// Register the adapter serving a datastore.
    pub fn datastore(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.datastores.register(name, adapter);
        self
    }

    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    /// Check that every model's datastore has an adapter and build the handle.
    pub fn build(self) -> Result<Orm> {
        for model in self.ontology.models() {
            if !self.datastores.contains(&model.datastore) {
                return Err(Error::DatastoreNotRegistered(model.datastore.clone()));
            }
        }
        Ok(Orm {
            ontology: Arc::new(self.ontology),
            datastores: self.datastores,
            config: self.config,
        })
    }
}

/// Entry point for model-level queries.
///
/// Every method takes loosely shaped caller input, validates it against the
/// ontology, compiles it down to physical queries and runs them on the
/// registered adapters. Queries that provably do nothing return their empty
/// result without reaching a backend.
#[derive(Debug, Clone)]
pub struct Orm {
    pub(crate) ontology: Arc<Ontology>,
    pub(crate) datastores: Datastores,
    pub(crate) config: OrmConfig,
}

impl Orm {
    pub fn builder(ontology: Ontology) -> OrmBuilder {
        OrmBuilder {
            ontology,
            datastores: Datastores::new(),
            config: OrmConfig::default(),
        }
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn datastores(&self) -> &Datastores {
        &self.datastores
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// Validate and normalize a stage-one query.
    pub fn forge(&self, query: Stage1Query) -> Result<Stage2Query> {
        let normalizer = Normalizer::new(&self.ontology).with_compat(self.config.compat);
        StageTwoForger::new(normalizer).forge(query)
    }

    /// Compile a stage-two query into its physical form.
    pub fn compile(&self, query: &Stage2Query) -> Result<Stage3Query> {
        StageThreeForger::new(&self.ontology).forge(query)
    }

    /// Forge a query, mapping a no-op to `None`.
    pub(crate) fn forge_or_noop(&self, query: Stage1Query) -> Result<Option<Stage2Query>> {
        match self.forge(query) {
            Ok(query) => Ok(Some(query)),
            Err(Error::Usage(e)) if e.is_noop() => {
                debug!(details = %e.details, "query would do nothing; skipping backend");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn model(&self, identity: &str) -> Result<&ModelDef> {
        self.ontology.get_model(identity)
    }

    pub(crate) fn adapter(&self, model: &ModelDef) -> Result<&Arc<dyn Adapter>> {
        self.datastores.get(&model.datastore)
    }

    /// Plan, run, integrate and shape a read.
    pub(crate) async fn read(&self, query: &Stage2Query) -> Result<Vec<Record>> {
        let physical = self.compile(query)?;
        let records = QueryExecutor::new(&self.ontology, &self.datastores)
            .execute(physical)
            .await?;
        Shaper::new(&self.ontology).shape(query, records)
    }

    /// Read a single record, enforcing the multiple-match guard.
    pub(crate) async fn read_one(&self, query: &Stage2Query) -> Result<Option<Record>> {
        let records = self.read(query).await?;
        if records.len() > 1 && self.config.find_one_guard {
            return Err(Error::MultipleMatches {
                model: query.using.clone(),
                count: records.len(),
            });
        }
        Ok(records.into_iter().next())
    }

    /// Find every record matching `criteria`, populating `populates`.
    ///
    /// Pass `Value::Null` for no populates.
    #[instrument(skip(self, criteria, populates))]
    pub async fn find(&self, model: &str, criteria: Value, populates: Value) -> Result<Vec<Record>> {
        let query = Stage1Query::new(Method::Find, model)
            .with_criteria(criteria)
            .with_populates(populates);
        match self.forge_or_noop(query)? {
            Some(query) => self.read(&query).await,
            None => Ok(Vec::new()),
        }
    }

    /// Find the single record matching `criteria`.
    #[instrument(skip(self, criteria, populates))]
    pub async fn find_one(&self, model: &str, criteria: Value, populates: Value) -> Result<Option<Record>> {
        let query = Stage1Query::new(Method::FindOne, model)
            .with_criteria(criteria)
            .with_populates(populates);
        match self.forge_or_noop(query)? {
            Some(query) => self.read_one(&query).await,
            None => Ok(None),
        }
    }

    /// Page through every matching record in batches of
    /// `stream_batch_size`, handing each batch to `iteratee`.
    ///
    /// Returns the number of records delivered.
    #[instrument(skip(self, criteria, populates, iteratee))]
    pub async fn stream(
        &self,
        model: &str,
        criteria: Value,
        populates: Value,
        mut iteratee: Iteratee<'_>,
    ) -> Result<u64> {
        let query = Stage1Query::new(Method::Stream, model)
            .with_criteria(criteria)
            .with_populates(populates)
            .with_iteratee(iteratee.kind());
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(0);
        };

        let base = query.criteria.clone().unwrap_or_default();
        let batch_size = self.config.stream_batch_size.max(1);
        let mut delivered = 0u64;
        loop {
            let remaining = base.limit.saturating_sub(delivered);
            if remaining == 0 {
                break;
            }
            let limit = remaining.min(batch_size);
            let mut page = query.clone();
            page.criteria = Some(Criteria {
                skip: base.skip.saturating_add(delivered),
                limit,
                ..base.clone()
            });

            let batch = self.read(&page).await?;
            let fetched = batch.len() as u64;
            debug!(skip = base.skip + delivered, fetched, "stream batch");
            if fetched == 0 {
                break;
            }
            delivered += fetched;
            iteratee.deliver(batch)?;
            if fetched < limit {
                break;
            }
        }
        Ok(delivered)
    }

    /// Count the records matching `criteria`.
    #[instrument(skip(self, criteria))]
    pub async fn count(&self, model: &str, criteria: Value) -> Result<u64> {
        let query = Stage1Query::new(Method::Count, model).with_criteria(criteria);
        let Some(query) = self.forge_or_noop(query)? else {
            return Ok(0);
        };
        let physical = self.compile(&query)?;
        Ok(self.adapter(self.model(&query.using)?)?.count(&physical).await?)
    }

    /// Sum a numeric attribute over the records matching `criteria`.
    #[instrument(skip(self, criteria))]
    pub async fn sum(&self, model: &str, numeric_attr: &str, criteria: Value) -> Result<f64> {
        let Some(query) = self.forge_or_noop(aggregate(Method::Sum, model, numeric_attr, criteria))? else {
            return Ok(0.0);
        };
        let physical = self.compile(&query)?;
        Ok(self.adapter(self.model(&query.using)?)?.sum(&physical).await?)
    }

    /// Average a numeric attribute over the records matching `criteria`.
    ///
    /// The average of no records is zero.
    #[instrument(skip(self, criteria))]
    pub async fn avg(&self, model: &str, numeric_attr: &str, criteria: Value) -> Result<f64> {
        let Some(query) = self.forge_or_noop(aggregate(Method::Avg, model, numeric_attr, criteria))? else {
            return Ok(0.0);
        };
        let physical = self.compile(&query)?;
        Ok(self.adapter(self.model(&query.using)?)?.avg(&physical).await?)
    }
}

fn aggregate(method: Method, model: &str, numeric_attr: &str, criteria: Value) -> Stage1Query {
    Stage1Query::new(method, model)
        .with_key(QueryKey::NumericAttrName, Value::String(numeric_attr.to_string()))
        .with_criteria(criteria)
}

/// Rewrite the column names of a uniqueness violation into attribute names.
pub(crate) fn adapter_error(model: &ModelDef, error: AdapterError) -> Error {
    match error {
        AdapterError::Unique { keys, message } => {
            let transformer = Transformer::new(model);
            Error::Adapter(AdapterError::Unique {
                keys: keys.iter().map(|k| transformer.attribute(k)).collect(),
                message,
            })
        }
        other => Error::Adapter(other),
    }
}

/// Primary-key value of an attribute-named record.
pub(crate) fn primary_key(model: &ModelDef, record: &Record) -> Result<Value> {
    record
        .get(&model.primary_key)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| {
            Error::Consistency(format!(
                "`{}` record came back without its primary key",
                model.identity
            ))
        })
}
