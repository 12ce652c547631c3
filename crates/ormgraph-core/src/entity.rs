//! The dynamic entity model.
//!
//! An [`Entity`] is one mapped instance: its concrete kind, its property
//! values and its relations to other instances. Instances are shared through
//! [`EntityRef`] handles so that a graph rebuilt from joined rows can hand the
//! same instance to several parents. `==` on handles compares values;
//! [`EntityRef::ptr_eq`] compares identity.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Related instances held under one relation name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<EntityRef>),
    Many(Vec<EntityRef>),
}

impl Related {
    /// Instances as a list: zero or one element for to-one relations.
    pub fn to_vec(&self) -> Vec<EntityRef> {
        match self {
            Related::One(one) => one.iter().cloned().collect(),
            Related::Many(many) => many.clone(),
        }
    }
}

/// One mapped instance.
#[derive(Debug, Clone)]
pub struct Entity {
    kind: String,
    properties: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
    persisted: bool,
}

impl Entity {
    pub fn new(kind: impl Into<String>) -> Self {
        Entity {
            kind: kind.into(),
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
            persisted: false,
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn with_one(mut self, relation: impl Into<String>, target: EntityRef) -> Self {
        self.set_to_one(relation, Some(target));
        self
    }

    pub fn with_many(mut self, relation: impl Into<String>, targets: Vec<EntityRef>) -> Self {
        self.set_to_many(relation, targets);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Value of `property`, `NULL` when unset.
    pub fn get(&self, property: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.properties.get(property).unwrap_or(&NULL)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(property.into(), value.into());
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_one(&self, name: &str) -> Option<&EntityRef> {
        match self.relations.get(name) {
            Some(Related::One(Some(target))) => Some(target),
            _ => None,
        }
    }

    pub fn to_many(&self, name: &str) -> &[EntityRef] {
        match self.relations.get(name) {
            Some(Related::Many(targets)) => targets,
            _ => &[],
        }
    }

    /// Instances under `name` whatever the relation's cardinality.
    pub fn related(&self, name: &str) -> Vec<EntityRef> {
        self.relations
            .get(name)
            .map(Related::to_vec)
            .unwrap_or_default()
    }

    pub fn set_to_one(&mut self, name: impl Into<String>, target: Option<EntityRef>) {
        self.relations.insert(name.into(), Related::One(target));
    }

    pub fn set_to_many(&mut self, name: impl Into<String>, targets: Vec<EntityRef>) {
        self.relations.insert(name.into(), Related::Many(targets));
    }

    /// Appends to a to-many relation, keeping duplicates.
    pub fn push_to_many(&mut self, name: impl Into<String>, target: EntityRef) {
        match self
            .relations
            .entry(name.into())
            .or_insert_with(|| Related::Many(Vec::new()))
        {
            Related::Many(targets) => targets.push(target),
            slot @ Related::One(_) => *slot = Related::Many(vec![target]),
        }
    }

    /// Appends to a to-many relation unless the very same instance is already
    /// present. Returns whether it was added.
    pub fn add_to_many(&mut self, name: impl Into<String>, target: EntityRef) -> bool {
        let name = name.into();
        if self.to_many(&name).iter().any(|t| t.ptr_eq(&target)) {
            return false;
        }
        self.push_to_many(name, target);
        true
    }

    /// Makes sure `name` exists as an (empty) to-many relation.
    pub fn ensure_many(&mut self, name: impl Into<String>) {
        self.relations
            .entry(name.into())
            .or_insert_with(|| Related::Many(Vec::new()));
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn mark_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }
}

impl PartialEq for Entity {
    /// Value equality; the persisted flag is bookkeeping, not data.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.properties == other.properties
            && self.relations == other.relations
    }
}

/// Shared handle to an [`Entity`].
#[derive(Clone, PartialEq)]
pub struct EntityRef(Rc<RefCell<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        EntityRef(Rc::new(RefCell::new(entity)))
    }

    pub fn borrow(&self) -> Ref<'_, Entity> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Entity> {
        self.0.borrow_mut()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared instance, usable as an identity key for the
    /// lifetime of the handle.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn kind(&self) -> String {
        self.0.borrow().kind.clone()
    }

    pub fn get(&self, property: &str) -> Value {
        self.0.borrow().get(property).clone()
    }

    pub fn set(&self, property: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().set(property, value);
    }

    pub fn to_one(&self, name: &str) -> Option<EntityRef> {
        self.0.borrow().to_one(name).cloned()
    }

    pub fn to_many(&self, name: &str) -> Vec<EntityRef> {
        self.0.borrow().to_many(name).to_vec()
    }

    pub fn is_persisted(&self) -> bool {
        self.0.borrow().persisted
    }

    /// Copies the whole graph reachable from this instance into fresh
    /// instances. Instances shared inside the graph stay shared in the copy.
    pub fn deep_clone(&self) -> EntityRef {
        let mut copies: Vec<(EntityRef, EntityRef)> = Vec::new();
        self.deep_clone_with(&mut copies)
    }

    fn deep_clone_with(&self, copies: &mut Vec<(EntityRef, EntityRef)>) -> EntityRef {
        if let Some((_, copy)) = copies.iter().find(|(orig, _)| orig.ptr_eq(self)) {
            return copy.clone();
        }
        let source = self.0.borrow();
        let copy = EntityRef::new(Entity {
            kind: source.kind.clone(),
            properties: source.properties.clone(),
            relations: BTreeMap::new(),
            persisted: source.persisted,
        });
        copies.push((self.clone(), copy.clone()));
        for (name, related) in &source.relations {
            let cloned = match related {
                Related::One(one) => Related::One(one.as_ref().map(|t| t.deep_clone_with(copies))),
                Related::Many(many) => {
                    Related::Many(many.iter().map(|t| t.deep_clone_with(copies)).collect())
                }
            };
            copy.0.borrow_mut().relations.insert(name.clone(), cloned);
        }
        copy
    }

    /// Renders the graph below this instance as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let entity = self.0.borrow();
        let properties: serde_json::Map<String, serde_json::Value> = entity
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or_default()))
            .collect();
        let relations: serde_json::Map<String, serde_json::Value> = entity
            .relations
            .iter()
            .map(|(name, related)| {
                let value = match related {
                    Related::One(None) => serde_json::Value::Null,
                    Related::One(Some(t)) => t.to_json(),
                    Related::Many(many) => {
                        serde_json::Value::Array(many.iter().map(EntityRef::to_json).collect())
                    }
                };
                (name.clone(), value)
            })
            .collect();
        serde_json::json!({
            "kind": entity.kind,
            "properties": properties,
            "relations": relations,
        })
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::new(entity)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entity) => entity.fmt(f),
            Err(_) => write!(f, "EntityRef(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: i64) -> EntityRef {
        Entity::new("Book").with("id", id).into()
    }

    #[test]
    fn add_to_many_dedups_by_identity() {
        let b = book(1);
        let mut author = Entity::new("Author");
        assert!(author.add_to_many("books", b.clone()));
        assert!(!author.add_to_many("books", b.clone()));
        // A value-equal but distinct instance is still added.
        assert!(author.add_to_many("books", book(1)));
        assert_eq!(author.to_many("books").len(), 2);
    }

    #[test]
    fn equality_is_by_value_identity_by_pointer() {
        let a = book(1);
        let b = book(1);
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn persisted_flag_is_not_part_of_equality() {
        let a = book(1);
        let b = book(1);
        b.borrow_mut().mark_persisted(true);
        assert_eq!(a, b);
    }

    #[test]
    fn deep_clone_keeps_shared_instances_shared() {
        let publisher: EntityRef = Entity::new("Publisher").with("id", 9).into();
        let b1: EntityRef = Entity::new("Book")
            .with("id", 1)
            .with_one("publisher", publisher.clone())
            .into();
        let b2: EntityRef = Entity::new("Book")
            .with("id", 2)
            .with_one("publisher", publisher.clone())
            .into();
        let author: EntityRef = Entity::new("Author")
            .with("id", 1)
            .with_many("books", vec![b1, b2])
            .into();

        let copy = author.deep_clone();
        assert_eq!(copy, author);
        let books = copy.to_many("books");
        let p1 = books[0].to_one("publisher").unwrap();
        let p2 = books[1].to_one("publisher").unwrap();
        assert!(p1.ptr_eq(&p2));
        assert!(!p1.ptr_eq(&publisher));
    }

    #[test]
    fn json_rendering() {
        let author: EntityRef = Entity::new("Author")
            .with("id", 1)
            .with_many("books", vec![book(3)])
            .into();
        let json = author.to_json();
        assert_eq!(json["kind"], "Author");
        assert_eq!(json["properties"]["id"], 1);
        assert_eq!(json["relations"]["books"][0]["properties"]["id"], 3);
    }

    #[test]
    fn related_lists_both_cardinalities() {
        let mut e = Entity::new("A");
        assert!(e.related("x").is_empty());
        e.set_to_one("x", Some(book(1)));
        assert_eq!(e.related("x").len(), 1);
        e.set_to_one("x", None);
        assert!(e.related("x").is_empty());
    }
}
