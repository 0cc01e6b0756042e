//! Join descriptors produced by stage-three forging.

use serde::Serialize;

use crate::criteria::Criteria;

/// One leg of a populate, addressed with physical names.
///
/// A singular or via-style plural association produces one join. A
/// junction-backed association produces two consecutive joins sharing `alias`:
/// parent to junction (not selectable), then junction to child.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    /// Identity of the parent model of this leg.
    pub parent_collection: String,
    /// Physical table of the parent.
    pub parent: String,
    /// `<parent table>__<alias>`.
    pub parent_alias: String,
    /// Column on the parent holding the join value.
    pub parent_key: String,
    /// Identity of the child model of this leg.
    pub child_collection: String,
    /// Physical table of the child.
    pub child: String,
    /// `<child table>__<alias>`.
    pub child_alias: String,
    /// Column on the child matched against `parent_key`.
    pub child_key: String,
    /// Primary-key column of the child.
    pub child_primary_key: String,
    /// Name of the populated attribute on the root record.
    pub alias: String,
    /// Whether this leg belongs to a junction-mediated association.
    pub is_junction: bool,
    /// Singular association.
    pub is_model_assoc: bool,
    /// Plural association.
    pub is_collection_assoc: bool,
    /// Whether `parent_key` is replaced by the populated value on output.
    pub remove_parent_key: bool,
    /// Whether records fetched for this leg end up in the output.
    pub select: bool,
    /// Column-named criteria for the child of this leg.
    pub criteria: Option<Criteria>,
}

impl Join {
    /// First leg of a junction chain (parent to junction table).
    pub fn is_junction_entry(&self) -> bool {
        self.is_junction && !self.select
    }
}

/// Joins of one populated attribute, in dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinGroup<'a> {
    pub alias: &'a str,
    pub legs: Vec<&'a Join>,
}

impl<'a> JoinGroup<'a> {
    /// The leg whose child records are attached to the parent.
    pub fn terminal(&self) -> &'a Join {
        self.legs[self.legs.len() - 1]
    }

    /// The junction leg, when the association goes through one.
    pub fn junction(&self) -> Option<&'a Join> {
        if self.legs.len() == 2 {
            Some(self.legs[0])
        } else {
            None
        }
    }
}

/// Group joins by alias, preserving first-seen order.
pub fn group_by_alias(joins: &[Join]) -> Vec<JoinGroup<'_>> {
    let mut groups: Vec<JoinGroup<'_>> = Vec::new();
    for join in joins {
        match groups.iter_mut().find(|g| g.alias == join.alias) {
            Some(group) => group.legs.push(join),
            None => groups.push(JoinGroup {
                alias: &join.alias,
                legs: vec![join],
            }),
        }
    }
    groups
}
