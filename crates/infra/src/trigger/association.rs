use std::collections::BTreeSet;

use reaper_core::{CascadePayload, DependentKeys, KeyValue, Record, RecordType};

use crate::record_store::{RecordStore, StoreError};

/// How dependents are reached from their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    /// Dependents carry `foreign_key` pointing at the owner.
    HasMany { foreign_key: String },
    /// Like `HasMany`, at most one dependent.
    HasOne { foreign_key: String },
    /// The owner carries `foreign_key` pointing at the dependent.
    BelongsTo { foreign_key: String },
    /// Owner → join rows of `through` → dependents.
    HasManyThrough {
        through: RecordType,
        /// Join column pointing at the owner.
        owner_foreign_key: String,
        /// Join column pointing at the dependent.
        dependent_foreign_key: String,
    },
}

/// An association whose dependents are destroyed by a background cascade
/// rather than inline with the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAssociation {
    name: String,
    owner_type: RecordType,
    dependent_type: RecordType,
    kind: AssociationKind,
    owner_key_column: Option<String>,
    dependent_key_column: Option<String>,
}

impl DeferredAssociation {
    fn new(
        name: impl Into<String>,
        owner_type: impl Into<RecordType>,
        dependent_type: impl Into<RecordType>,
        kind: AssociationKind,
    ) -> Self {
        Self {
            name: name.into(),
            owner_type: owner_type.into(),
            dependent_type: dependent_type.into(),
            kind,
            owner_key_column: None,
            dependent_key_column: None,
        }
    }

    pub fn has_many(
        name: impl Into<String>,
        owner_type: impl Into<RecordType>,
        dependent_type: impl Into<RecordType>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let foreign_key = foreign_key.into();
        Self::new(name, owner_type, dependent_type, AssociationKind::HasMany { foreign_key })
    }

    pub fn has_one(
        name: impl Into<String>,
        owner_type: impl Into<RecordType>,
        dependent_type: impl Into<RecordType>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let foreign_key = foreign_key.into();
        Self::new(name, owner_type, dependent_type, AssociationKind::HasOne { foreign_key })
    }

    pub fn belongs_to(
        name: impl Into<String>,
        owner_type: impl Into<RecordType>,
        dependent_type: impl Into<RecordType>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let foreign_key = foreign_key.into();
        Self::new(name, owner_type, dependent_type, AssociationKind::BelongsTo { foreign_key })
    }

    pub fn has_many_through(
        name: impl Into<String>,
        owner_type: impl Into<RecordType>,
        dependent_type: impl Into<RecordType>,
        through: impl Into<RecordType>,
        owner_foreign_key: impl Into<String>,
        dependent_foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            owner_type,
            dependent_type,
            AssociationKind::HasManyThrough {
                through: through.into(),
                owner_foreign_key: owner_foreign_key.into(),
                dependent_foreign_key: dependent_foreign_key.into(),
            },
        )
    }

    /// Owner column the foreign key refers to (defaults to the owner's
    /// primary key). Unused by `BelongsTo`.
    pub fn owner_key(mut self, column: impl Into<String>) -> Self {
        self.owner_key_column = Some(column.into());
        self
    }

    /// Dependent column carried in the cascade payload (defaults to the
    /// dependent's primary key).
    pub fn dependent_key(mut self, column: impl Into<String>) -> Self {
        self.dependent_key_column = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_type(&self) -> &RecordType {
        &self.owner_type
    }

    pub fn dependent_type(&self) -> &RecordType {
        &self.dependent_type
    }

    pub fn kind(&self) -> &AssociationKind {
        &self.kind
    }

    /// Build the cascade payload for a just-destroyed `owner`.
    ///
    /// Returns `None` when no dependent resolves; callers enqueue nothing in
    /// that case.
    pub fn resolve(
        &self,
        store: &dyn RecordStore,
        owner: &Record,
    ) -> Result<Option<CascadePayload>, StoreError> {
        let owner_pk = store.primary_key_column(&self.owner_type)?;
        let owner_key = owner.require_key(&owner_pk)?;
        let dependent_key_column = match &self.dependent_key_column {
            Some(column) => column.clone(),
            None => store.primary_key_column(&self.dependent_type)?,
        };

        let keys = self.dependent_keys(store, owner, &owner_pk, &dependent_key_column)?;
        let Ok(keys) = DependentKeys::new(keys) else {
            return Ok(None);
        };

        Ok(Some(CascadePayload::new(
            self.owner_type.clone(),
            owner_key,
            self.dependent_type.clone(),
            dependent_key_column,
            keys,
        )))
    }

    fn dependent_keys(
        &self,
        store: &dyn RecordStore,
        owner: &Record,
        owner_pk: &str,
        dependent_key_column: &str,
    ) -> Result<BTreeSet<KeyValue>, StoreError> {
        let owner_column = self.owner_key_column.as_deref().unwrap_or(owner_pk);

        let keys = match &self.kind {
            AssociationKind::HasMany { foreign_key } | AssociationKind::HasOne { foreign_key } => {
                let Some(owner_value) = owner.key(owner_column) else {
                    return Ok(BTreeSet::new());
                };
                let mut rows = store.find_all_by_keys(
                    &self.dependent_type,
                    foreign_key,
                    &BTreeSet::from([owner_value]),
                )?;
                if matches!(self.kind, AssociationKind::HasOne { .. }) {
                    rows.truncate(1);
                }
                column_values(&rows, dependent_key_column)
            }
            AssociationKind::BelongsTo { foreign_key } => {
                let Some(target) = owner.key(foreign_key) else {
                    return Ok(BTreeSet::new());
                };
                let dependent_pk = store.primary_key_column(&self.dependent_type)?;
                if dependent_key_column == dependent_pk {
                    BTreeSet::from([target])
                } else {
                    let rows = store.find_all_by_keys(
                        &self.dependent_type,
                        &dependent_pk,
                        &BTreeSet::from([target]),
                    )?;
                    column_values(&rows, dependent_key_column)
                }
            }
            AssociationKind::HasManyThrough {
                through,
                owner_foreign_key,
                dependent_foreign_key,
            } => {
                let Some(owner_value) = owner.key(owner_column) else {
                    return Ok(BTreeSet::new());
                };
                let joins =
                    store.find_all_by_keys(through, owner_foreign_key, &BTreeSet::from([owner_value]))?;
                let targets = column_values(&joins, dependent_foreign_key);
                if targets.is_empty() {
                    return Ok(targets);
                }
                let dependent_pk = store.primary_key_column(&self.dependent_type)?;
                let rows = store.find_all_by_keys(&self.dependent_type, &dependent_pk, &targets)?;
                column_values(&rows, dependent_key_column)
            }
        };
        Ok(keys)
    }
}

fn column_values(rows: &[Record], column: &str) -> BTreeSet<KeyValue> {
    rows.iter().filter_map(|row| row.key(column)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::{InMemoryRecordStore, Schema};

    fn library() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new(
            Schema::new()
                .table("book")
                .table("tag")
                .table("tagging")
                .table("cover")
                .table_with_key("parent", "parent_id"),
        );
        store.create(Record::new("book").with("id", 1).with("cover_id", 50)).unwrap();
        store.create(Record::new("book").with("id", 2)).unwrap();
        store.create(Record::new("cover").with("id", 50)).unwrap();
        for (id, name) in [(10, "treasure"), (11, "rum"), (12, "parrot")] {
            store.create(Record::new("tag").with("id", id).with("name", name)).unwrap();
        }
        for (id, book, tag) in [(100, 1, 10), (101, 1, 11), (102, 2, 12)] {
            store
                .create(Record::new("tagging").with("id", id).with("book_id", book).with("tag_id", tag))
                .unwrap();
        }
        store
    }

    fn book(store: &InMemoryRecordStore, id: i64) -> Record {
        store
            .find_by_key(&RecordType::new("book"), "id", &KeyValue::Int(id))
            .unwrap()
            .unwrap()
    }

    fn keys(payload: &CascadePayload) -> Vec<KeyValue> {
        payload.dependent_keys().iter().cloned().collect()
    }

    #[test]
    fn has_many_collects_dependent_primary_keys() {
        let store = library();
        let assoc = DeferredAssociation::has_many("taggings", "book", "tagging", "book_id");

        let payload = assoc.resolve(&store, &book(&store, 1)).unwrap().unwrap();
        assert_eq!(payload.owner_key(), &KeyValue::Int(1));
        assert_eq!(payload.dependent_key_column(), "id");
        assert_eq!(keys(&payload), vec![KeyValue::Int(100), KeyValue::Int(101)]);
    }

    #[test]
    fn has_many_through_collects_far_side_keys() {
        let store = library();
        let assoc =
            DeferredAssociation::has_many_through("tags", "book", "tag", "tagging", "book_id", "tag_id");

        let payload = assoc.resolve(&store, &book(&store, 1)).unwrap().unwrap();
        assert_eq!(payload.dependent_type().as_str(), "tag");
        assert_eq!(keys(&payload), vec![KeyValue::Int(10), KeyValue::Int(11)]);
    }

    #[test]
    fn dependent_key_override_is_carried_in_payload() {
        let store = library();
        let assoc =
            DeferredAssociation::has_many_through("tags", "book", "tag", "tagging", "book_id", "tag_id")
                .dependent_key("name");

        let payload = assoc.resolve(&store, &book(&store, 2)).unwrap().unwrap();
        assert_eq!(payload.dependent_key_column(), "name");
        assert_eq!(keys(&payload), vec![KeyValue::from("parrot")]);
    }

    #[test]
    fn belongs_to_targets_the_referenced_row() {
        let store = library();
        let assoc = DeferredAssociation::belongs_to("cover", "book", "cover", "cover_id");

        let payload = assoc.resolve(&store, &book(&store, 1)).unwrap().unwrap();
        assert_eq!(keys(&payload), vec![KeyValue::Int(50)]);
        assert!(assoc.resolve(&store, &book(&store, 2)).unwrap().is_none());
    }

    #[test]
    fn no_dependents_means_no_payload() {
        let store = library();
        store.create(Record::new("book").with("id", 3)).unwrap();
        let assoc = DeferredAssociation::has_many("taggings", "book", "tagging", "book_id");

        assert!(assoc.resolve(&store, &book(&store, 3)).unwrap().is_none());
    }

    #[test]
    fn owner_key_override_and_custom_primary_key() {
        let store = library();
        store
            .create(Record::new("parent").with("parent_id", 7).with("many_key", "k-1"))
            .unwrap();
        store
            .create(Record::new("tag").with("id", 20).with("many_key", "k-1"))
            .unwrap();
        store
            .create(Record::new("tag").with("id", 21).with("many_key", "k-1"))
            .unwrap();
        let parent = store
            .find_by_key(&RecordType::new("parent"), "parent_id", &KeyValue::Int(7))
            .unwrap()
            .unwrap();

        let has_one = DeferredAssociation::has_one("tag", "parent", "tag", "many_key").owner_key("many_key");
        let payload = has_one.resolve(&store, &parent).unwrap().unwrap();
        assert_eq!(payload.owner_key(), &KeyValue::Int(7));
        assert_eq!(keys(&payload), vec![KeyValue::Int(20)]);

        let has_many = DeferredAssociation::has_many("tags", "parent", "tag", "many_key").owner_key("many_key");
        assert_eq!(has_many.resolve(&store, &parent).unwrap().unwrap().dependent_keys().len(), 2);
    }
}
