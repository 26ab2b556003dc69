//! The process-local document store: databases own collections, collections
//! own documents keyed by their `_id` stringification.
//!
//! Lookups are create-or-get at every level, so callers never see a missing
//! database or collection. Lock ordering is store, then database, then
//! collection; the `Arc` handles returned by the accessors mean no two
//! levels' locks are ever held at once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::engine::{self, UpdateError};

#[derive(Clone, Default)]
pub struct Store {
    dbs: Arc<RwLock<HashMap<String, Arc<Database>>>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn db(&self, name: &str) -> Arc<Database> {
        if let Some(db) = self.dbs.read().unwrap().get(name) {
            return db.clone();
        }
        self.dbs
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn db_names(&self) -> Vec<String> {
        self.dbs.read().unwrap().keys().cloned().collect()
    }
}

#[derive(Default)]
pub struct Database {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    last_error: RwLock<Option<Document>>,
}

impl Database {
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(coll) = self.collections.read().unwrap().get(name) {
            return coll.clone();
        }
        self.collections
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().unwrap().keys().cloned().collect()
    }

    /// A database is empty while it has no collections.
    pub fn is_empty(&self) -> bool {
        self.collections.read().unwrap().is_empty()
    }

    pub fn last_error(&self) -> Option<Document> {
        self.last_error.read().unwrap().clone()
    }

    pub fn set_last_error(&self, doc: Document) {
        *self.last_error.write().unwrap() = Some(doc);
    }
}

#[derive(Default)]
pub struct Collection {
    docs: RwLock<HashMap<String, Document>>,
}

impl Collection {
    /// Stores a document, generating a fresh ObjectId `_id` when the document
    /// lacks one. Returns the document's id.
    pub fn insert(&self, mut doc: Document) -> Bson {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };
        self.docs.write().unwrap().insert(id_key(&id), doc);
        id
    }

    pub fn all(&self) -> Vec<Document> {
        self.docs.read().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: &Bson) -> Option<Document> {
        self.docs.read().unwrap().get(&id_key(id)).cloned()
    }

    pub fn find(&self, selector: Option<&Document>) -> Vec<Document> {
        match selector {
            None => self.all(),
            Some(selector) => self
                .docs
                .read()
                .unwrap()
                .values()
                .filter(|doc| engine::matches(doc, selector))
                .cloned()
                .collect(),
        }
    }

    pub fn count(&self, selector: Option<&Document>) -> usize {
        self.find(selector).len()
    }

    /// Mutates matching documents in place under the collection's write lock.
    /// Without `multi`, at most the first match is touched. Returns the
    /// number of documents modified; the first application error aborts.
    pub fn update_matching<F>(
        &self,
        selector: &Document,
        multi: bool,
        mut apply: F,
    ) -> Result<usize, UpdateError>
    where
        F: FnMut(&mut Document) -> Result<(), UpdateError>,
    {
        let mut docs = self.docs.write().unwrap();
        let mut matched = 0;
        for doc in docs.values_mut() {
            if !engine::matches(doc, selector) {
                continue;
            }
            apply(doc)?;
            matched += 1;
            if !multi {
                break;
            }
        }
        Ok(matched)
    }
}

/// The canonical string form a document is keyed by: ObjectIds by their hex
/// form, strings by themselves, anything else by its BSON display form.
fn id_key(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
