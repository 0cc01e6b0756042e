//! Read-query execution: plan, run, integrate.

use ormweave_proto::{Record, Stage3Query};
use tracing::instrument;

use super::integrator::integrate;
use super::planner::{OperationPlanner, Plan, PlanState};
use super::runner::OperationRunner;
use crate::datastore::Datastores;
use crate::error::Result;
use crate::ontology::Ontology;

/// Executes stage-three read queries across datastores.
pub struct QueryExecutor<'a> {
    ontology: &'a Ontology,
    datastores: &'a Datastores,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(ontology: &'a Ontology, datastores: &'a Datastores) -> Self {
        Self {
            ontology,
            datastores,
        }
    }

    /// Plan a query without running it.
    pub fn plan(&self, query: Stage3Query) -> Result<Plan> {
        OperationPlanner::new(self.ontology, self.datastores).plan(query)
    }

    /// Plan and run a query, returning column-named parent records with
    /// every join alias attached.
    #[instrument(skip(self, query), fields(model = %query.model))]
    pub async fn execute(&self, query: Stage3Query) -> Result<Vec<Record>> {
        let mut plan = self.plan(query)?;
        self.execute_plan(&mut plan).await
    }

    /// Run an already-built plan.
    pub async fn execute_plan(&self, plan: &mut Plan) -> Result<Vec<Record>> {
        let cache = OperationRunner::new(self.datastores).run(plan).await?;
        let records = if plan.deferred.is_empty() {
            cache.into_parents()
        } else {
            integrate(&plan.deferred, &cache)
        };
        plan.state = PlanState::Combined;
        Ok(records)
    }
}
