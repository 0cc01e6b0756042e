//! Operation planning.
//!
//! The planner decides how many backend calls a stage-three query needs. A
//! query without joins, or whose every join can be served natively by the
//! parent's adapter, is a single operation. Otherwise each join leg that
//! cannot be served natively becomes its own operation, to be run after the
//! parent and stitched back in memory.

use std::fmt;

use ormweave_proto::{group_by_alias, Join, Method, Stage3Query};
use tracing::debug;

use crate::datastore::Datastores;
use crate::error::Result;
use crate::ontology::Ontology;

/// Lifecycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Unplanned,
    Planned,
    Running,
    Combined,
    Failed,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanState::Unplanned => "unplanned",
            PlanState::Planned => "planned",
            PlanState::Running => "running",
            PlanState::Combined => "combined",
            PlanState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One physical call to one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: usize,
    /// Datastore the call goes to.
    pub datastore: String,
    /// Identity of the collection read.
    pub collection: String,
    pub query: Stage3Query,
    /// Operation whose results this one's `in` filter is derived from.
    pub depends_on: Option<usize>,
    /// The join leg this operation resolves; `None` for the parent.
    pub leg: Option<Join>,
}

/// An executable plan. Operation `0` is always the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub operations: Vec<Operation>,
    /// The parent operation resolves every join itself.
    pub pre_combined: bool,
    /// Joins left for the in-memory integrator.
    pub deferred: Vec<Join>,
    /// Primary-key column of the parent collection.
    pub parent_primary_key: String,
    pub state: PlanState,
}

impl Plan {
    pub fn parent(&self) -> &Operation {
        &self.operations[0]
    }

    /// Child operations grouped by join alias, each chain in dependency
    /// order.
    pub fn chains(&self) -> Vec<Vec<&Operation>> {
        let mut chains: Vec<Vec<&Operation>> = Vec::new();
        for op in &self.operations[1..] {
            let chain = op
                .depends_on
                .and_then(|dep| chains.iter_mut().find(|c| c.last().is_some_and(|l| l.id == dep)));
            match chain {
                Some(chain) => chain.push(op),
                None => chains.push(vec![op]),
            }
        }
        chains
    }

    pub fn is_single_operation(&self) -> bool {
        self.operations.len() == 1
    }
}

/// Turns stage-three queries into plans.
pub struct OperationPlanner<'a> {
    ontology: &'a Ontology,
    datastores: &'a Datastores,
}

impl<'a> OperationPlanner<'a> {
    pub fn new(ontology: &'a Ontology, datastores: &'a Datastores) -> Self {
        Self {
            ontology,
            datastores,
        }
    }

    /// Plan a read query.
    pub fn plan(&self, query: Stage3Query) -> Result<Plan> {
        let model = self.ontology.get_model(&query.model)?;
        let parent_datastore = model.datastore.clone();
        let parent_primary_key = model.primary_key_column().to_string();
        let adapter = self.datastores.get(&parent_datastore)?;

        if query.joins.is_empty() {
            debug!(model = %query.model, "single operation, no joins");
            return Ok(single(parent_datastore, parent_primary_key, query, false));
        }

        let native = adapter.supports_join();
        let mut folded = Vec::new();
        let mut deferred = Vec::new();
        for group in group_by_alias(&query.joins) {
            let mut local = native;
            for leg in &group.legs {
                let child = self.ontology.get_model(&leg.child_collection)?;
                local &= child.datastore == parent_datastore;
            }
            let legs = group.legs.into_iter().cloned();
            if local {
                folded.extend(legs);
            } else {
                deferred.extend(legs);
            }
        }

        if deferred.is_empty() {
            debug!(model = %query.model, joins = query.joins.len(), "native join, pre-combined");
            return Ok(single(parent_datastore, parent_primary_key, query, true));
        }

        let mut parent_query = query;
        parent_query.joins = folded;
        let mut operations = vec![Operation {
            id: 0,
            datastore: parent_datastore,
            collection: parent_query.model.clone(),
            query: parent_query,
            depends_on: None,
            leg: None,
        }];

        let mut previous: Option<(&str, usize)> = None;
        for leg in &deferred {
            let child = self.ontology.get_model(&leg.child_collection)?;
            let id = operations.len();
            let depends_on = match previous {
                Some((alias, prev)) if alias == leg.alias => prev,
                _ => 0,
            };
            let criteria = leg.criteria.clone().unwrap_or_default().without_pagination();
            let query = Stage3Query::new(Method::Find, &leg.child, &leg.child_collection)
                .with_criteria(criteria);
            debug!(
                alias = %leg.alias,
                collection = %leg.child_collection,
                datastore = %child.datastore,
                depends_on,
                "deferred join operation"
            );
            operations.push(Operation {
                id,
                datastore: child.datastore.clone(),
                collection: leg.child_collection.clone(),
                query,
                depends_on: Some(depends_on),
                leg: Some(leg.clone()),
            });
            previous = Some((&leg.alias, id));
        }

        Ok(Plan {
            operations,
            pre_combined: false,
            deferred,
            parent_primary_key,
            state: PlanState::Planned,
        })
    }
}

fn single(datastore: String, parent_primary_key: String, query: Stage3Query, pre_combined: bool) -> Plan {
    Plan {
        operations: vec![Operation {
            id: 0,
            datastore,
            collection: query.model.clone(),
            query,
            depends_on: None,
            leg: None,
        }],
        pre_combined,
        deferred: Vec::new(),
        parent_primary_key,
        state: PlanState::Planned,
    }
}
