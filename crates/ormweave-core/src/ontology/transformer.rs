//! Attribute-name to column-name translation.

use ormweave_proto::{Criteria, Record, SortDirective, WhereClause, SELECT_ALL};

use super::model::ModelDef;
use crate::error::{Error, Result};

/// Translates between a model's attribute names and its physical column
/// names.
#[derive(Debug, Clone, Copy)]
pub struct Transformer<'a> {
    model: &'a ModelDef,
}

impl<'a> Transformer<'a> {
    pub fn new(model: &'a ModelDef) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &'a ModelDef {
        self.model
    }

    /// Column for an attribute. Undeclared attributes keep their name.
    pub fn column(&self, attr: &str) -> String {
        self.model.column_of(attr).to_string()
    }

    /// Attribute for a column. Unknown columns keep their name.
    pub fn attribute(&self, column: &str) -> String {
        self.model
            .attribute_for_column(column)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| column.to_string())
    }

    /// Rewrite an attribute-named record into column names.
    ///
    /// Plural associations have no column and are dropped.
    pub fn serialize(&self, record: &Record) -> Result<Record> {
        let mut out = Record::new();
        for (name, value) in record {
            match self.model.get_attribute(name) {
                Some(attr) if attr.is_plural() => {}
                Some(attr) => {
                    out.insert(attr.column_name.clone(), value.clone());
                }
                None if self.model.schema => {
                    return Err(Error::InvalidRecord(format!(
                        "`{name}` is not an attribute of `{}`",
                        self.model.identity
                    )));
                }
                None => {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }

    /// Rewrite a column-named record into attribute names.
    pub fn unserialize(&self, record: Record) -> Record {
        record
            .into_iter()
            .map(|(column, value)| (self.attribute(&column), value))
            .collect()
    }

    pub fn serialize_where(&self, clause: &WhereClause) -> WhereClause {
        clause.map_attrs(&|attr: &str| self.column(attr))
    }

    pub fn serialize_sort(&self, sort: &[SortDirective]) -> Vec<SortDirective> {
        sort.iter()
            .map(|d| SortDirective {
                attr: self.column(&d.attr),
                direction: d.direction,
            })
            .collect()
    }

    pub fn serialize_select(&self, select: &[String]) -> Vec<String> {
        select
            .iter()
            .map(|s| {
                if s == SELECT_ALL {
                    s.clone()
                } else {
                    self.column(s)
                }
            })
            .collect()
    }

    /// Rewrite every attribute name in a criteria.
    pub fn serialize_criteria(&self, criteria: &Criteria) -> Criteria {
        Criteria {
            where_clause: self.serialize_where(&criteria.where_clause),
            limit: criteria.limit,
            skip: criteria.skip,
            sort: self.serialize_sort(&criteria.sort),
            select: self.serialize_select(&criteria.select),
            omit: self.serialize_select(&criteria.omit),
        }
    }
}
