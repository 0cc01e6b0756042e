//! The model registry.
//!
//! An [`Ontology`] is built once from a set of [`ModelDef`]s and is immutable
//! afterwards. Building validates every association and generates the junction
//! models that back collection-to-collection associations.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::attribute::{AttributeDef, AttributeKind, ScalarType};
use super::model::ModelDef;
use super::transformer::Transformer;
use crate::error::{Error, Result};

/// Primary-key attribute of a generated junction model.
pub const JUNCTION_PRIMARY_KEY: &str = "id";

/// How a plural association is wired to a junction model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionLink {
    /// Identity of the junction model.
    pub model: String,
    /// Junction attribute holding the parent's primary key.
    pub parent_fk: String,
    /// Junction attribute holding the child's primary key.
    pub child_fk: String,
}

/// A resolved association.
#[derive(Debug, Clone, Copy)]
pub enum Association<'a> {
    /// The parent stores the child's primary key in `attribute`.
    Singular {
        attribute: &'a AttributeDef,
        target: &'a ModelDef,
    },
    /// Children point back at the parent through `via` (one-to-many).
    Via {
        target: &'a ModelDef,
        via: &'a AttributeDef,
    },
    /// Parent and children are linked through rows of a junction model.
    Junction {
        target: &'a ModelDef,
        junction: &'a ModelDef,
        parent_fk: &'a AttributeDef,
        child_fk: &'a AttributeDef,
    },
}

impl<'a> Association<'a> {
    pub fn target(&self) -> &'a ModelDef {
        match self {
            Association::Singular { target, .. }
            | Association::Via { target, .. }
            | Association::Junction { target, .. } => target,
        }
    }
}

/// Immutable registry of models.
#[derive(Debug, Clone, Default)]
pub struct Ontology {
    models: BTreeMap<String, ModelDef>,
    junctions: HashMap<(String, String), JunctionLink>,
}

impl Ontology {
    pub fn builder() -> OntologyBuilder {
        OntologyBuilder::default()
    }

    /// Look up a model by identity.
    pub fn get_model(&self, identity: &str) -> Result<&ModelDef> {
        self.models
            .get(identity)
            .ok_or_else(|| Error::ModelNotRegistered(identity.to_string()))
    }

    /// Look up an attribute of a model.
    pub fn get_attribute(&self, model: &str, attribute: &str) -> Result<&AttributeDef> {
        self.get_model(model)?
            .get_attribute(attribute)
            .ok_or_else(|| Error::AttributeNotRegistered {
                model: model.to_string(),
                attribute: attribute.to_string(),
            })
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    /// Number of registered models, junctions included.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Transformer for a model.
    pub fn transformer(&self, identity: &str) -> Result<Transformer<'_>> {
        Ok(Transformer::new(self.get_model(identity)?))
    }

    /// The junction link of a plural association, if it goes through one.
    pub fn junction_link(&self, model: &str, attribute: &str) -> Option<&JunctionLink> {
        self.junctions.get(&(model.to_string(), attribute.to_string()))
    }

    /// Resolve an association attribute into its physical wiring.
    pub fn association(&self, model: &str, attribute: &str) -> Result<Association<'_>> {
        let attr = self.get_attribute(model, attribute)?;
        match &attr.kind {
            AttributeKind::Scalar(_) => Err(Error::Consistency(format!(
                "`{model}.{attribute}` is not an association"
            ))),
            AttributeKind::Model { target } => Ok(Association::Singular {
                attribute: attr,
                target: self.get_model(target)?,
            }),
            AttributeKind::Collection { target, via, .. } => {
                let target = self.get_model(target)?;
                if let Some(link) = self.junction_link(model, attribute) {
                    return Ok(Association::Junction {
                        target,
                        junction: self.get_model(&link.model)?,
                        parent_fk: self.get_attribute(&link.model, &link.parent_fk)?,
                        child_fk: self.get_attribute(&link.model, &link.child_fk)?,
                    });
                }
                let via = via.as_deref().ok_or_else(|| {
                    Error::Consistency(format!("`{model}.{attribute}` has no `via`"))
                })?;
                Ok(Association::Via {
                    target,
                    via: self.get_attribute(&target.identity, via)?,
                })
            }
        }
    }
}

/// Collects models and builds a validated [`Ontology`].
#[derive(Debug, Default)]
pub struct OntologyBuilder {
    models: Vec<ModelDef>,
}

impl OntologyBuilder {
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    pub fn models(mut self, models: impl IntoIterator<Item = ModelDef>) -> Self {
        self.models.extend(models);
        self
    }

    /// Validate the registered models and generate junction models.
    pub fn build(self) -> Result<Ontology> {
        let mut models = BTreeMap::new();
        for model in self.models {
            if models.contains_key(&model.identity) {
                return Err(Error::Consistency(format!(
                    "model `{}` registered twice",
                    model.identity
                )));
            }
            models.insert(model.identity.clone(), model);
        }

        for model in models.values() {
            validate_model(model, &models)?;
        }

        let mut junctions = HashMap::new();
        let mut generated = Vec::new();
        for model in models.values() {
            for attr in model.plural_attributes() {
                let AttributeKind::Collection {
                    target,
                    via,
                    through,
                } = &attr.kind
                else {
                    continue;
                };
                let key = (model.identity.clone(), attr.name.clone());

                if let Some(through) = through {
                    let link = through_link(model, attr, target, via.as_deref(), through, &models)?;
                    junctions.insert(key, link);
                    continue;
                }

                let Some(via) = via else { continue };
                let target_model = &models[target];
                let Some(back) = target_model.get_attribute(via) else {
                    continue;
                };
                if !back.is_plural() {
                    continue;
                }
                if model.identity == target_model.identity && attr.name == back.name {
                    return Err(Error::Consistency(format!(
                        "`{}.{}` cannot be its own `via`",
                        model.identity, attr.name
                    )));
                }

                let (first, second) = ordered_sides((model, attr), (target_model, back));
                let name = junction_name(first, second);
                let parent_fk = side_column(model, attr);
                let child_fk = side_column(target_model, back);
                junctions.insert(
                    key,
                    JunctionLink {
                        model: name.clone(),
                        parent_fk,
                        child_fk,
                    },
                );

                if generated.iter().any(|m: &ModelDef| m.identity == name) {
                    continue;
                }
                if models.contains_key(&name) {
                    return Err(Error::Consistency(format!(
                        "junction `{name}` collides with a registered model"
                    )));
                }
                let datastore = if attr.dominant {
                    model.datastore.clone()
                } else if back.dominant {
                    target_model.datastore.clone()
                } else {
                    first.0.datastore.clone()
                };
                debug!(junction = %name, datastore = %datastore, "generated junction model");
                generated.push(junction_model(&name, datastore, first, second));
            }
        }

        for junction in generated {
            models.insert(junction.identity.clone(), junction);
        }

        Ok(Ontology { models, junctions })
    }
}

fn validate_model(model: &ModelDef, models: &BTreeMap<String, ModelDef>) -> Result<()> {
    let pk = model.primary_key_attribute().ok_or_else(|| {
        Error::Consistency(format!(
            "model `{}` has no primary key attribute `{}`",
            model.identity, model.primary_key
        ))
    })?;
    if !matches!(
        pk.kind,
        AttributeKind::Scalar(ScalarType::String | ScalarType::Number)
    ) {
        return Err(Error::Consistency(format!(
            "primary key of `{}` must be a string or number",
            model.identity
        )));
    }

    for (i, attr) in model.attributes.iter().enumerate() {
        let clash = model.attributes[..i].iter().any(|a| {
            a.name == attr.name
                || (!a.is_plural() && !attr.is_plural() && a.column_name == attr.column_name)
        });
        if clash {
            return Err(Error::Consistency(format!(
                "`{}.{}` duplicates another attribute or column",
                model.identity, attr.name
            )));
        }

        match &attr.kind {
            AttributeKind::Scalar(_) => {}
            AttributeKind::Model { target } => {
                require_model(models, target, model, attr)?;
            }
            AttributeKind::Collection {
                target,
                via,
                through,
            } => {
                let target_model = require_model(models, target, model, attr)?;
                let via = via.as_deref().ok_or_else(|| {
                    Error::Consistency(format!(
                        "`{}.{}` must declare `via`",
                        model.identity, attr.name
                    ))
                })?;
                if through.is_some() {
                    // Checked while linking.
                    continue;
                }
                let back = target_model.get_attribute(via).ok_or_else(|| {
                    Error::Consistency(format!(
                        "`{}.{}` names unknown via `{}.{}`",
                        model.identity, attr.name, target, via
                    ))
                })?;
                let points_back = match &back.kind {
                    AttributeKind::Model { target } => *target == model.identity,
                    AttributeKind::Collection {
                        target,
                        via: Some(back_via),
                        through: None,
                    } => *target == model.identity && *back_via == attr.name,
                    _ => false,
                };
                if !points_back {
                    return Err(Error::Consistency(format!(
                        "`{}.{}` does not point back at `{}.{}`",
                        target, via, model.identity, attr.name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn require_model<'m>(
    models: &'m BTreeMap<String, ModelDef>,
    target: &str,
    model: &ModelDef,
    attr: &AttributeDef,
) -> Result<&'m ModelDef> {
    models.get(target).ok_or_else(|| {
        Error::Consistency(format!(
            "`{}.{}` targets unregistered model `{}`",
            model.identity, attr.name, target
        ))
    })
}

fn through_link(
    model: &ModelDef,
    attr: &AttributeDef,
    target: &str,
    via: Option<&str>,
    through: &str,
    models: &BTreeMap<String, ModelDef>,
) -> Result<JunctionLink> {
    let junction = require_model(models, through, model, attr)?;
    let via = via.unwrap_or_default();
    let parent_fk = junction
        .get_attribute(via)
        .filter(|a| a.target() == Some(model.identity.as_str()) && a.is_singular_association())
        .ok_or_else(|| {
            Error::Consistency(format!(
                "`{through}.{via}` must be a singular association to `{}`",
                model.identity
            ))
        })?;
    let child_fk = junction
        .stored_attributes()
        .find(|a| {
            a.name != parent_fk.name && a.is_singular_association() && a.target() == Some(target)
        })
        .ok_or_else(|| {
            Error::Consistency(format!(
                "`{through}` has no singular association to `{target}`"
            ))
        })?;
    Ok(JunctionLink {
        model: through.to_string(),
        parent_fk: parent_fk.name.clone(),
        child_fk: child_fk.name.clone(),
    })
}

type Side<'a> = (&'a ModelDef, &'a AttributeDef);

fn ordered_sides<'a>(a: Side<'a>, b: Side<'a>) -> (Side<'a>, Side<'a>) {
    let key = |s: &Side<'_>| (s.0.identity.clone(), s.1.name.clone());
    if key(&a) <= key(&b) {
        (a, b)
    } else {
        (b, a)
    }
}

fn side_column(model: &ModelDef, attr: &AttributeDef) -> String {
    format!("{}_{}", model.identity, attr.name)
}

fn junction_name(first: Side<'_>, second: Side<'_>) -> String {
    format!(
        "{}__{}",
        side_column(first.0, first.1),
        side_column(second.0, second.1)
    )
}

fn junction_model(name: &str, datastore: String, first: Side<'_>, second: Side<'_>) -> ModelDef {
    let mut model = ModelDef::new(name, JUNCTION_PRIMARY_KEY)
        .with_datastore(datastore)
        .with_attribute(AttributeDef::number(JUNCTION_PRIMARY_KEY).auto_increment())
        .with_attribute(AttributeDef::model(
            side_column(first.0, first.1),
            first.0.identity.clone(),
        ))
        .with_attribute(AttributeDef::model(
            side_column(second.0, second.1),
            second.0.identity.clone(),
        ));
    model.junction = true;
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> ModelDef {
        ModelDef::new("user", "id")
            .with_attribute(AttributeDef::number("id").auto_increment())
            .with_attribute(AttributeDef::string("name"))
            .with_attribute(AttributeDef::collection("pets", "pet").via("owner"))
            .with_attribute(AttributeDef::collection("tags", "tag").via("users"))
    }

    fn pet() -> ModelDef {
        ModelDef::new("pet", "id")
            .with_attribute(AttributeDef::number("id").auto_increment())
            .with_attribute(AttributeDef::model("owner", "user").column("owner_id"))
    }

    fn tag() -> ModelDef {
        ModelDef::new("tag", "id")
            .with_datastore("tags_db")
            .with_attribute(AttributeDef::number("id").auto_increment())
            .with_attribute(AttributeDef::collection("users", "user").via("tags").dominant())
    }

    #[test]
    fn test_generates_junction_for_many_to_many() {
        let ontology = Ontology::builder()
            .model(user())
            .model(pet())
            .model(tag())
            .build()
            .unwrap();

        let junction = ontology.get_model("tag_users__user_tags").unwrap();
        assert!(junction.junction);
        assert_eq!(junction.datastore, "tags_db");
        assert_eq!(
            junction
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>(),
            vec!["id", "tag_users", "user_tags"]
        );

        let link = ontology.junction_link("user", "tags").unwrap();
        assert_eq!(link.parent_fk, "user_tags");
        assert_eq!(link.child_fk, "tag_users");
        let back = ontology.junction_link("tag", "users").unwrap();
        assert_eq!(back.parent_fk, "tag_users");
        assert_eq!(back.model, link.model);
    }

    #[test]
    fn test_resolves_associations() {
        let ontology = Ontology::builder()
            .models([user(), pet(), tag()])
            .build()
            .unwrap();

        match ontology.association("user", "pets").unwrap() {
            Association::Via { target, via } => {
                assert_eq!(target.identity, "pet");
                assert_eq!(via.column_name, "owner_id");
            }
            other => panic!("expected via, got {other:?}"),
        }
        assert!(matches!(
            ontology.association("pet", "owner").unwrap(),
            Association::Singular { .. }
        ));
        assert!(matches!(
            ontology.association("user", "tags").unwrap(),
            Association::Junction { .. }
        ));
        assert!(ontology.association("user", "name").is_err());
    }

    #[test]
    fn test_explicit_through_model() {
        let user = ModelDef::new("user", "id")
            .with_attribute(AttributeDef::number("id"))
            .with_attribute(
                AttributeDef::collection("pets", "pet")
                    .via("owner")
                    .through("ownership"),
            );
        let pet = ModelDef::new("pet", "id").with_attribute(AttributeDef::number("id"));
        let ownership = ModelDef::new("ownership", "id")
            .with_attribute(AttributeDef::number("id"))
            .with_attribute(AttributeDef::model("owner", "user"))
            .with_attribute(AttributeDef::model("animal", "pet"));

        let ontology = Ontology::builder()
            .models([user, pet, ownership])
            .build()
            .unwrap();
        let link = ontology.junction_link("user", "pets").unwrap();
        assert_eq!(link.model, "ownership");
        assert_eq!(link.parent_fk, "owner");
        assert_eq!(link.child_fk, "animal");
    }

    #[test]
    fn test_rejects_inconsistent_models() {
        let missing_pk = ModelDef::new("a", "id").with_attribute(AttributeDef::string("name"));
        let err = Ontology::builder().model(missing_pk).build().unwrap_err();
        assert!(err.is_consistency_violation());

        let dangling = ModelDef::new("a", "id")
            .with_attribute(AttributeDef::number("id"))
            .with_attribute(AttributeDef::model("b", "nope"));
        assert!(Ontology::builder().model(dangling).build().is_err());

        let no_via = ModelDef::new("a", "id")
            .with_attribute(AttributeDef::number("id"))
            .with_attribute(AttributeDef::collection("bs", "a"));
        assert!(Ontology::builder().model(no_via).build().is_err());
    }

    #[test]
    fn test_lookup_errors() {
        let ontology = Ontology::builder().models([user(), pet(), tag()]).build().unwrap();
        assert!(matches!(
            ontology.get_model("nope"),
            Err(Error::ModelNotRegistered(_))
        ));
        assert!(matches!(
            ontology.get_attribute("user", "nope"),
            Err(Error::AttributeNotRegistered { .. })
        ));
    }
}
