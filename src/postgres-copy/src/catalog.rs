// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An explicit registry of entities, passed to every operation that needs to
//! resolve entity names to tables and columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::desc::{ColumnDesc, EntityDesc, TableRef};
use crate::CopyError;

/// A Rust type bound to a table.
///
/// ```
/// use mz_postgres_copy::{Catalog, ColumnDesc, Entity, TableRef};
///
/// struct User;
///
/// impl Entity for User {
///     const NAME: &'static str = "User";
///
///     fn table() -> TableRef {
///         TableRef::new("users")
///     }
///
///     fn columns() -> Vec<ColumnDesc> {
///         vec![ColumnDesc::new("id").not_null(), ColumnDesc::new("email")]
///     }
/// }
///
/// let mut catalog = Catalog::default();
/// catalog.register::<User>();
/// assert!(catalog.is_mapped::<User>());
/// ```
pub trait Entity {
    /// The identifier the entity is registered and referenced under.
    const NAME: &'static str;

    fn table() -> TableRef;

    /// The entity's columns in declaration order.
    fn columns() -> Vec<ColumnDesc>;

    fn desc() -> EntityDesc {
        EntityDesc::new(Self::NAME, Self::table(), Self::columns())
    }
}

/// Maps entity identifiers to their descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entities: BTreeMap<String, EntityDesc>,
}

impl Catalog {
    /// Registers `desc` under its name, returning the description it replaced,
    /// if any.
    pub fn register_desc(&mut self, desc: EntityDesc) -> Option<EntityDesc> {
        self.entities.insert(desc.name.clone(), desc)
    }

    pub fn register<T: Entity>(&mut self) -> Option<EntityDesc> {
        self.register_desc(T::desc())
    }

    pub fn get(&self, name: &str) -> Option<&EntityDesc> {
        self.entities.get(name)
    }

    /// Like [`Catalog::get`], but failing for unregistered entities.
    pub fn entity(&self, name: &str) -> Result<&EntityDesc, CopyError> {
        self.get(name)
            .ok_or_else(|| CopyError::UnknownEntity(name.to_string()))
    }

    /// Reports whether `candidate` names a registered entity. Never fails.
    pub fn is_mapped_entity(&self, candidate: &str) -> bool {
        self.entities.contains_key(candidate)
    }

    pub fn is_mapped<T: Entity>(&self) -> bool {
        self.is_mapped_entity(T::NAME)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDesc> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<EntityDesc> for Catalog {
    fn from_iter<I: IntoIterator<Item = EntityDesc>>(iter: I) -> Self {
        let mut catalog = Catalog::default();
        for desc in iter {
            catalog.register_desc(desc);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl Entity for Widget {
        const NAME: &'static str = "Widget";

        fn table() -> TableRef {
            TableRef::qualified("inventory", "widgets")
        }

        fn columns() -> Vec<ColumnDesc> {
            vec![ColumnDesc::new("id").not_null(), ColumnDesc::new("label")]
        }
    }

    #[test]
    fn registered_types_are_mapped() {
        let mut catalog = Catalog::default();
        assert!(!catalog.is_mapped::<Widget>());
        assert!(catalog.register::<Widget>().is_none());
        assert!(catalog.is_mapped::<Widget>());
        assert!(catalog.is_mapped_entity("Widget"));
        assert_eq!(
            catalog.entity("Widget").unwrap().table,
            TableRef::qualified("inventory", "widgets")
        );
    }

    #[test]
    fn unknown_names_are_not_mapped() {
        let catalog: Catalog = [Widget::desc()].into_iter().collect();
        for candidate in ["", "widget", "widgets", "{}", "42", "inventory.widgets"] {
            assert!(!catalog.is_mapped_entity(candidate), "{candidate:?}");
        }
        assert!(matches!(
            catalog.entity("Gadget"),
            Err(CopyError::UnknownEntity(name)) if name == "Gadget"
        ));
    }

    #[test]
    fn reregistering_replaces() {
        let mut catalog = Catalog::default();
        catalog.register::<Widget>();
        let replaced = catalog.register_desc(EntityDesc::new(
            "Widget",
            TableRef::new("widgets_v2"),
            vec![ColumnDesc::new("id")],
        ));
        assert_eq!(replaced, Some(Widget::desc()));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("Widget").unwrap().table.name, "widgets_v2");
    }
}
