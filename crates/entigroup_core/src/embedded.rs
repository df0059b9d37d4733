//! Embedded objects, flattened onto the owner's entity.

use crate::error::{CoreError, CoreResult};
use crate::field_manager::{from_property, to_property};
use crate::metadata::{ClassMeta, EmbeddedMeta, FieldKind, MetadataRegistry};
use crate::object::{EmbeddedObject, FieldValue};
use entigroup_storage::Entity;
use std::sync::Arc;

/// Reads and writes an embedded field against the owner's entity.
///
/// Each nested field becomes one property named by the embedded field's
/// override, or its prefix plus the nested column. Embedded objects nested
/// inside embedded objects are named `<outer>.<inner>`.
///
/// A null embedded object stores no properties at all, so on read every
/// nested property is absent and the field comes back null. An embedded
/// object whose fields are all null stores null-valued properties and
/// comes back as an object.
#[derive(Debug)]
pub struct EmbeddedFieldManager<'a> {
    metadata: &'a MetadataRegistry,
}

impl<'a> EmbeddedFieldManager<'a> {
    /// Creates a manager resolving embeddable classes through `metadata`.
    #[must_use]
    pub fn new(metadata: &'a MetadataRegistry) -> Self {
        Self { metadata }
    }

    /// Writes an embedded value into the entity.
    pub fn store(&self, entity: &mut Entity, meta: &EmbeddedMeta, value: &FieldValue) -> CoreResult<()> {
        self.store_at(entity, meta, "", value)
    }

    /// Reads an embedded value from the entity.
    pub fn fetch(&self, entity: &Entity, meta: &EmbeddedMeta) -> CoreResult<FieldValue> {
        self.fetch_at(entity, meta, "")
    }

    /// Returns every property name the embedded field can occupy.
    pub fn property_names(&self, meta: &EmbeddedMeta) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        self.collect_names(meta, "", &mut names)?;
        Ok(names)
    }

    fn class(&self, meta: &EmbeddedMeta) -> CoreResult<Arc<ClassMeta>> {
        self.metadata.class(meta.class())
    }

    fn store_at(
        &self,
        entity: &mut Entity,
        meta: &EmbeddedMeta,
        outer: &str,
        value: &FieldValue,
    ) -> CoreResult<()> {
        let object = match value {
            FieldValue::Embedded(object) => object,
            FieldValue::Null => {
                // Clear anything a previous write left behind
                let mut names = Vec::new();
                self.collect_names(meta, outer, &mut names)?;
                for name in names {
                    entity.remove_property(&name);
                }
                return Ok(());
            }
            other => {
                return Err(CoreError::illegal_argument(format!(
                    "embedded {} cannot hold {other:?}",
                    meta.class()
                )))
            }
        };

        let class = self.class(meta)?;
        for field in class.fields() {
            let name = format!("{outer}{}", meta.property_name(field));
            let nested = object.get(field.name()).cloned().unwrap_or_default();
            match field.kind() {
                FieldKind::Embedded(inner) => {
                    self.store_at(entity, inner, &format!("{name}."), &nested)?;
                }
                FieldKind::Scalar(ty) => {
                    let property = to_property(class.name(), field, ty, &nested)?;
                    entity.set_property(name, property);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn fetch_at(&self, entity: &Entity, meta: &EmbeddedMeta, outer: &str) -> CoreResult<FieldValue> {
        let class = self.class(meta)?;
        let mut object = EmbeddedObject::new();
        let mut present = false;

        for field in class.fields() {
            let name = format!("{outer}{}", meta.property_name(field));
            match field.kind() {
                FieldKind::Embedded(inner) => {
                    let nested = self.fetch_at(entity, inner, &format!("{name}."))?;
                    if !nested.is_null() {
                        present = true;
                        object.set(field.name(), nested);
                    }
                }
                FieldKind::Scalar(ty) => {
                    if let Some(property) = entity.property(&name) {
                        present = true;
                        object.set(field.name(), from_property(class.name(), field, ty, property)?);
                    }
                }
                _ => {}
            }
        }

        Ok(if present {
            FieldValue::Embedded(object)
        } else {
            FieldValue::Null
        })
    }

    fn collect_names(&self, meta: &EmbeddedMeta, outer: &str, names: &mut Vec<String>) -> CoreResult<()> {
        let class = self.class(meta)?;
        for field in class.fields() {
            let name = format!("{outer}{}", meta.property_name(field));
            match field.kind() {
                FieldKind::Embedded(inner) => self.collect_names(inner, &format!("{name}."), names)?,
                _ => names.push(name),
            }
        }
        Ok(())
    }
}
