//! Selector matching and update-spec application.
//!
//! A selector is an equality conjunction: a document matches when it carries
//! every (key, value) pair of the selector, compared by value. An update spec
//! is either an operator update (keys starting with `$`) or a whole-document
//! replacement.

use bson::{doc, Bson, Document};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq)]
pub enum UpdateError {
    #[error("unsupported update operator: {0:?}")]
    UnsupportedOperator(String),
    #[error("{0:?} requires a document argument")]
    BadArgument(String),
}

pub fn matches(doc: &Document, selector: &Document) -> bool {
    selector.iter().all(|(key, value)| doc.get(key) == Some(value))
}

/// The first `$`-prefixed key of an update spec, if any. A spec with such a
/// key is an operator update; one without is a replacement.
pub fn first_operator(spec: &Document) -> Option<&str> {
    spec.keys()
        .map(String::as_str)
        .find(|key| key.starts_with('$'))
}

/// Applies an update spec to a document in place.
///
/// Operator updates support `$set` only; every other `$`-operator is
/// rejected. A replacement removes all target fields except `_id`, then sets
/// the spec's fields.
pub fn apply_update(target: &mut Document, spec: &Document) -> Result<(), UpdateError> {
    let mut replaced = false;
    for (key, value) in spec {
        match key.as_str() {
            "$set" => {
                let set = value
                    .as_document()
                    .ok_or_else(|| UpdateError::BadArgument(key.clone()))?;
                for (set_key, set_value) in set {
                    target.insert(set_key.clone(), set_value.clone());
                }
            }
            key if key.starts_with('$') => {
                return Err(UpdateError::UnsupportedOperator(key.to_string()));
            }
            _ => {
                if !replaced {
                    replaced = true;
                    let id = target.get("_id").cloned();
                    target.clear();
                    if let Some(id) = id {
                        target.insert("_id", id);
                    }
                }
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// The outcome of an update, recorded in the database's last-error slot and
/// returned by `getLastError`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteResult {
    pub n: i32,
    pub updated_existing: bool,
    pub upserted: Option<Bson>,
}

impl From<&WriteResult> for Document {
    fn from(result: &WriteResult) -> Document {
        let mut doc = doc! {
            "n": result.n,
            "updatedExisting": result.updated_existing,
        };
        if let Some(id) = &result.upserted {
            doc.insert("upserted", id.clone());
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn matches_on_equal_pairs() {
        let doc = doc! { "artist": "ed hall", "label": "trance syndicate" };
        assert!(matches(&doc, &doc! {}));
        assert!(matches(&doc, &doc! { "artist": "ed hall" }));
        assert!(matches(
            &doc,
            &doc! { "artist": "ed hall", "label": "trance syndicate" }
        ));
    }

    #[test]
    fn does_not_match_absent_or_unequal_keys() {
        let doc = doc! { "artist": "ed hall" };
        assert!(!matches(&doc, &doc! { "artist": "cherubs" }));
        assert!(!matches(&doc, &doc! { "venue": "liberty lunch" }));
    }

    #[test]
    fn equality_is_typed() {
        // An int32 selector value does not match an int64 field; equality is
        // the underlying value type's equality.
        let doc = doc! { "i": 1i64 };
        assert!(!matches(&doc, &doc! { "i": 1i32 }));
        assert!(matches(&doc, &doc! { "i": 1i64 }));
    }

    #[test]
    fn set_merges_into_target() {
        let mut target = doc! { "_id": 1, "artist": "ed hall", "venue": "liberty lunch" };
        apply_update(&mut target, &doc! { "$set": { "artist": "fugazi", "label": "dischord" } })
            .unwrap();

        assert_eq!(
            target,
            doc! { "_id": 1, "artist": "fugazi", "venue": "liberty lunch", "label": "dischord" }
        );
    }

    #[test]
    fn set_requires_a_document() {
        let mut target = doc! { "_id": 1 };
        let err = apply_update(&mut target, &doc! { "$set": 42 }).unwrap_err();
        assert_eq!(err, UpdateError::BadArgument("$set".to_string()));
    }

    #[test]
    fn replacement_preserves_id() {
        let id = ObjectId::new();
        let mut target = doc! { "_id": id, "artist": "ed hall", "label": "trance syndicate" };
        apply_update(&mut target, &doc! { "artist": "fugazi", "venue": "liberty lunch" }).unwrap();

        assert_eq!(target.get_object_id("_id").unwrap(), id);
        assert_eq!(target.get_str("artist").unwrap(), "fugazi");
        assert_eq!(target.get_str("venue").unwrap(), "liberty lunch");
        assert!(target.get("label").is_none());
    }

    #[test]
    fn unsupported_operators_are_rejected() {
        for op in [
            "$inc",
            "$unset",
            "$rename",
            "$currentDate",
            "$max",
            "$min",
            "$mul",
            "$setOnInsert",
        ] {
            let mut target = doc! { "_id": 1, "v": 1 };
            let err = apply_update(&mut target, &doc! { op: { "v": 2 } }).unwrap_err();
            assert_eq!(err, UpdateError::UnsupportedOperator(op.to_string()));
        }
    }

    #[test]
    fn operator_update_detection() {
        assert_eq!(first_operator(&doc! { "$set": { "a": 1 } }), Some("$set"));
        assert_eq!(first_operator(&doc! { "a": 1 }), None);
    }

    #[test]
    fn write_result_document_shape() {
        let result = WriteResult {
            n: 1,
            updated_existing: true,
            upserted: None,
        };
        assert_eq!(
            Document::from(&result),
            doc! { "n": 1, "updatedExisting": true }
        );

        let id = ObjectId::new();
        let result = WriteResult {
            n: 0,
            updated_existing: false,
            upserted: Some(Bson::ObjectId(id)),
        };
        assert_eq!(
            Document::from(&result),
            doc! { "n": 0, "updatedExisting": false, "upserted": id }
        );
    }
}
