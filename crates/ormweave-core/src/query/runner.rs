//! Plan execution.

use futures::future::try_join_all;
use ormweave_proto::{Filter, Record, WhereClause};
use tracing::{debug, instrument, warn};

use super::cache::{distinct, CacheBuilder, ResultCache};
use super::planner::{Operation, Plan, PlanState};
use crate::datastore::Datastores;
use crate::error::{Error, Result};

/// Executes plans against registered datastores.
///
/// The parent operation always runs first. Join aliases then run
/// concurrently; the legs of one alias run in sequence because each leg's
/// `in` filter comes from the previous leg's records. The first failure
/// aborts the whole plan and the partial cache is dropped.
pub struct OperationRunner<'a> {
    datastores: &'a Datastores,
}

impl<'a> OperationRunner<'a> {
    pub fn new(datastores: &'a Datastores) -> Self {
        Self { datastores }
    }

    #[instrument(skip(self, plan), fields(model = %plan.parent().collection, operations = plan.operations.len()))]
    pub async fn run(&self, plan: &mut Plan) -> Result<ResultCache> {
        plan.state = PlanState::Running;
        match self.run_operations(plan).await {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(error = %e, "plan failed");
                plan.state = PlanState::Failed;
                Err(e)
            }
        }
    }

    async fn run_operations(&self, plan: &Plan) -> Result<ResultCache> {
        let parent = plan.parent();
        let adapter = self.datastores.get(&parent.datastore)?;
        let records = if parent.query.joins.is_empty() {
            adapter.find(&parent.query).await?
        } else {
            adapter.join(&parent.query).await?
        };
        debug!(
            datastore = %parent.datastore,
            records = records.len(),
            "parent operation complete"
        );

        let cache = CacheBuilder::new(&parent.collection, &plan.parent_primary_key, records);
        if plan.pre_combined || plan.is_single_operation() {
            return Ok(cache.freeze());
        }
        if cache.parents().is_empty() {
            debug!("no parent records, skipping child operations");
            return Ok(cache.freeze());
        }

        let chains = plan.chains();
        try_join_all(chains.iter().map(|chain| self.run_chain(chain, &cache))).await?;
        Ok(cache.freeze())
    }

    /// Run the legs of one alias in order.
    async fn run_chain(&self, chain: &[&Operation], cache: &CacheBuilder) -> Result<()> {
        let mut sources: Option<Vec<Record>> = None;
        for op in chain {
            let leg = op.leg.as_ref().ok_or_else(|| {
                Error::Consistency(format!("operation {} has no join leg", op.id))
            })?;
            let values = match &sources {
                None => distinct(cache.parents().iter(), &leg.parent_key),
                Some(records) => distinct(records.iter(), &leg.parent_key),
            };
            if values.is_empty() {
                debug!(alias = %leg.alias, collection = %op.collection, "no join values, skipping");
                return Ok(());
            }

            let mut query = op.query.clone();
            let mut criteria = query.criteria_or_default();
            criteria.where_clause =
                WhereClause::filter(Filter::is_in(&leg.child_key, values)).and(criteria.where_clause);
            query.criteria = Some(criteria);

            let adapter = self.datastores.get(&op.datastore)?;
            debug!(
                alias = %leg.alias,
                operation = op.id,
                datastore = %op.datastore,
                collection = %op.collection,
                "dispatching join operation"
            );
            let records = adapter.find(&query).await?;
            cache.append(leg, records.clone());
            sources = Some(records);
        }
        Ok(())
    }
}
