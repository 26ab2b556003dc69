//! Request dispatch: routes parsed wire messages to command handlers, system
//! pseudo-collections, or the document store, and turns handler failures into
//! error-reply documents.

use bson::{doc, Bson, Document};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::commands::{AdminCommand, Context, DbCommand, Outcome};
use crate::engine::{self, UpdateError, WriteResult};
use crate::frame::{OpInsert, OpQuery, OpUpdate};
use crate::store::Database;

/// A handler-level failure. These are surfaced to the client as
/// `{errmsg, ok: 0}` replies; the connection stays up.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("malformed full collection name {0:?}")]
    MalformedNamespace(String),
    #[error("{op} not supported on {namespace:?}")]
    UnsupportedNamespace {
        op: &'static str,
        namespace: String,
    },
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("unsupported {scope} command: {name:?}")]
    UnsupportedCommand {
        scope: &'static str,
        name: String,
    },
    #[error("unsupported system query on {namespace}: {query}")]
    UnsupportedSystemQuery { namespace: String, query: Document },
    #[error("{0}")]
    BadInput(String),
    #[error("{0}")]
    Stub(&'static str),
}

/// The error-reply document for a failed request.
pub fn error_reply(err: &impl std::fmt::Display) -> Document {
    doc! { "errmsg": err.to_string(), "ok": 0 }
}

/// What the connection loop should do after a query has been handled.
#[derive(Debug, PartialEq)]
pub enum Action {
    Reply(Vec<Document>),
    Shutdown,
}

/// A `"<db>.<coll>"` name split at the first dot.
struct Namespace<'a> {
    db: &'a str,
    coll: &'a str,
}

impl<'a> Namespace<'a> {
    fn parse(full: &'a str) -> Result<Namespace<'a>, Error> {
        let (db, coll) = full
            .split_once('.')
            .ok_or_else(|| Error::MalformedNamespace(full.to_string()))?;
        Ok(Namespace { db, coll })
    }
}

pub fn handle_query(ctx: &Context, query: &OpQuery) -> Result<Action, Error> {
    if query.full_collection_name == "admin.$cmd" {
        let command = AdminCommand::try_from(query)?;
        return Ok(command.exec(ctx)?.into());
    }

    let ns = Namespace::parse(&query.full_collection_name)?;

    if ns.coll.starts_with("system.") {
        return handle_system_query(ctx, &ns, query).map(Action::Reply);
    }

    if ns.coll == "$cmd" {
        let command = DbCommand::parse(ns.db, query)?;
        return Ok(command.exec(ctx)?.into());
    }

    let coll = ctx.store.db(ns.db).collection(ns.coll);
    let docs = match query.get("$query") {
        Some(Bson::Document(selector)) => coll.find(Some(selector)),
        Some(Bson::Null) => coll.find(None),
        Some(other) => {
            return Err(Error::BadInput(format!(
                "cannot use {other} as a query document"
            )))
        }
        None if query.query.is_empty() => coll.all(),
        None => coll.find(Some(&query.query)),
    };
    Ok(Action::Reply(docs))
}

fn handle_system_query(
    ctx: &Context,
    ns: &Namespace,
    query: &OpQuery,
) -> Result<Vec<Document>, Error> {
    match ns.coll {
        "system.namespaces" => Ok(ctx
            .store
            .db(ns.db)
            .collection_names()
            .into_iter()
            .map(|name| doc! { "name": name })
            .collect()),
        _ => Err(Error::UnsupportedSystemQuery {
            namespace: query.full_collection_name.clone(),
            query: query.query.clone(),
        }),
    }
}

pub fn handle_insert(ctx: &Context, insert: &OpInsert) -> Result<(), Error> {
    let ns = writable_namespace("insert", &insert.full_collection_name)?;
    let db = ctx.store.db(ns.db);
    let coll = db.collection(ns.coll);

    for doc in &insert.documents {
        coll.insert(doc.clone());
        // A successful write leaves an empty last-error document behind.
        db.set_last_error(Document::new());
    }
    Ok(())
}

pub fn handle_update(ctx: &Context, update: &OpUpdate) -> Result<(), Error> {
    let ns = writable_namespace("update", &update.full_collection_name)?;
    let db = ctx.store.db(ns.db);
    let coll = db.collection(ns.coll);

    let matched = match coll.update_matching(&update.selector, update.multi(), |doc| {
        engine::apply_update(doc, &update.update)
    }) {
        Ok(matched) => matched,
        Err(err) => return Err(record_write_error(&db, err)),
    };

    let mut result = WriteResult {
        n: matched as i32,
        updated_existing: matched > 0,
        upserted: None,
    };

    if update.upsert() && matched == 0 {
        // An operator spec has no document form to insert; upserting one is
        // rejected rather than storing literal `$`-keys.
        if let Some(op) = engine::first_operator(&update.update) {
            let err = UpdateError::UnsupportedOperator(op.to_string());
            return Err(record_write_error(&db, err));
        }
        let id = coll.insert(update.update.clone());
        result.upserted = Some(id);
    }

    db.set_last_error(Document::from(&result));
    Ok(())
}

/// A failed write leaves its error reply in the last-error slot before the
/// error goes back on the wire, so a following `getLastError` reports it.
fn record_write_error(db: &Database, err: UpdateError) -> Error {
    let err = Error::from(err);
    db.set_last_error(error_reply(&err));
    err
}

/// Rejects writes aimed at `admin.*` or `<db>.system.*` before touching the
/// store.
fn writable_namespace<'a>(op: &'static str, full: &'a str) -> Result<Namespace<'a>, Error> {
    if full.starts_with("admin.") {
        return Err(Error::UnsupportedNamespace {
            op,
            namespace: full.to_string(),
        });
    }
    let ns = Namespace::parse(full)?;
    if ns.coll.starts_with("system.") {
        return Err(Error::UnsupportedNamespace {
            op,
            namespace: full.to_string(),
        });
    }
    Ok(ns)
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Action {
        match outcome {
            Outcome::Reply(docs) => Action::Reply(docs),
            Outcome::Shutdown => Action::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: Store,
        shutdown: CancellationToken,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                store: Store::new(),
                shutdown: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> Context {
            Context {
                store: &self.store,
                client_addr: "127.0.0.1:9".parse().unwrap(),
                shutdown: &self.shutdown,
            }
        }
    }

    fn query(ns: &str, doc: Document) -> OpQuery {
        OpQuery {
            request_id: 1,
            flags: 0,
            full_collection_name: ns.to_string(),
            number_to_skip: 0,
            number_to_return: 0,
            query: doc,
            return_fields: None,
        }
    }

    fn insert(ns: &str, documents: Vec<Document>) -> OpInsert {
        OpInsert {
            request_id: 1,
            flags: 0,
            full_collection_name: ns.to_string(),
            documents,
        }
    }

    fn update(ns: &str, selector: Document, spec: Document, flags: i32) -> OpUpdate {
        OpUpdate {
            request_id: 1,
            full_collection_name: ns.to_string(),
            flags,
            selector,
            update: spec,
        }
    }

    fn reply_docs(action: Action) -> Vec<Document> {
        match action {
            Action::Reply(docs) => docs,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn empty_query_returns_every_document() {
        let f = Fixture::new();
        handle_insert(&f.ctx(), &insert("db1.c1", vec![doc! { "foo": 1, "bar": 2 }])).unwrap();

        let docs = reply_docs(handle_query(&f.ctx(), &query("db1.c1", doc! {})).unwrap());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_i32("foo").unwrap(), 1);
        assert!(matches!(docs[0].get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn plain_selector_and_dollar_query_agree() {
        let f = Fixture::new();
        handle_insert(
            &f.ctx(),
            &insert(
                "db1.c1",
                vec![
                    doc! { "artist": "ed hall", "label": "trance syndicate" },
                    doc! { "artist": "cherubs", "label": "trance syndicate" },
                    doc! { "artist": "the jesus lizard", "label": "touch & go" },
                ],
            ),
        )
        .unwrap();

        let plain = reply_docs(
            handle_query(
                &f.ctx(),
                &query("db1.c1", doc! { "label": "trance syndicate" }),
            )
            .unwrap(),
        );
        let wrapped = reply_docs(
            handle_query(
                &f.ctx(),
                &query("db1.c1", doc! { "$query": { "label": "trance syndicate" } }),
            )
            .unwrap(),
        );

        assert_eq!(plain.len(), 2);
        assert_eq!(wrapped.len(), 2);
    }

    #[test]
    fn malformed_namespace_is_rejected() {
        let f = Fixture::new();
        let err = handle_query(&f.ctx(), &query("nodot", doc! {})).unwrap_err();
        assert!(matches!(err, Error::MalformedNamespace(_)));
    }

    #[test]
    fn writes_to_reserved_namespaces_are_rejected() {
        let f = Fixture::new();

        let err =
            handle_insert(&f.ctx(), &insert("admin.anything", vec![doc! { "a": 1 }])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedNamespace { op: "insert", .. }));

        let err = handle_insert(
            &f.ctx(),
            &insert("db1.system.namespaces", vec![doc! { "a": 1 }]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedNamespace { op: "insert", .. }));

        let upd = update("admin.c1", doc! {}, doc! { "a": 1 }, 0);
        let err = handle_update(&f.ctx(), &upd).unwrap_err();
        assert!(matches!(err, Error::UnsupportedNamespace { op: "update", .. }));
    }

    #[test]
    fn replacement_update_rewrites_matches_and_records_result() {
        let f = Fixture::new();
        handle_insert(
            &f.ctx(),
            &insert(
                "db1.c1",
                vec![doc! { "artist": "ed hall", "label": "trance syndicate", "venue": "liberty lunch" }],
            ),
        )
        .unwrap();

        handle_update(
            &f.ctx(),
            &update(
                "db1.c1",
                doc! { "artist": "ed hall" },
                doc! { "artist": "fugazi", "label": "dischord", "venue": "liberty lunch" },
                0,
            ),
        )
        .unwrap();

        let gone = reply_docs(
            handle_query(&f.ctx(), &query("db1.c1", doc! { "artist": "ed hall" })).unwrap(),
        );
        assert!(gone.is_empty());

        let found = reply_docs(
            handle_query(&f.ctx(), &query("db1.c1", doc! { "venue": "liberty lunch" })).unwrap(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("artist").unwrap(), "fugazi");

        let last = f.store.db("db1").last_error().unwrap();
        assert_eq!(last.get_i32("n").unwrap(), 1);
        assert!(last.get_bool("updatedExisting").unwrap());
    }

    #[test]
    fn non_multi_update_modifies_at_most_one_document() {
        let f = Fixture::new();
        handle_insert(
            &f.ctx(),
            &insert(
                "db1.c1",
                vec![
                    doc! { "label": "trance syndicate" },
                    doc! { "label": "trance syndicate" },
                ],
            ),
        )
        .unwrap();

        handle_update(
            &f.ctx(),
            &update(
                "db1.c1",
                doc! { "label": "trance syndicate" },
                doc! { "$set": { "seen": true } },
                0,
            ),
        )
        .unwrap();

        let seen = reply_docs(
            handle_query(&f.ctx(), &query("db1.c1", doc! { "seen": true })).unwrap(),
        );
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn upsert_inserts_the_spec_when_nothing_matches() {
        let f = Fixture::new();
        handle_update(
            &f.ctx(),
            &update(
                "db1.c1",
                doc! { "k": "missing" },
                doc! { "k": "missing", "v": 42 },
                crate::frame::UPDATE_FLAG_UPSERT,
            ),
        )
        .unwrap();

        let all = reply_docs(handle_query(&f.ctx(), &query("db1.c1", doc! {})).unwrap());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_i32("v").unwrap(), 42);
        assert!(matches!(all[0].get("_id"), Some(Bson::ObjectId(_))));

        let last = f.store.db("db1").last_error().unwrap();
        assert_eq!(last.get_i32("n").unwrap(), 0);
        assert!(matches!(last.get("upserted"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn operator_upsert_with_no_match_is_rejected() {
        let f = Fixture::new();
        let err = handle_update(
            &f.ctx(),
            &update(
                "db1.c1",
                doc! { "k": "missing" },
                doc! { "$set": { "v": 42 } },
                crate::frame::UPDATE_FLAG_UPSERT,
            ),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Update(UpdateError::UnsupportedOperator(ref op)) if op == "$set"
        ));

        // The failed write is visible through the last-error slot too.
        let last = f.store.db("db1").last_error().unwrap();
        assert!(last.get_str("errmsg").unwrap().contains("$set"));
        assert_eq!(last.get_i32("ok").unwrap(), 0);
    }

    #[test]
    fn unsupported_operator_surfaces_in_the_error_reply() {
        let f = Fixture::new();
        handle_insert(&f.ctx(), &insert("db1.c1", vec![doc! { "v": 1 }])).unwrap();

        let err = handle_update(
            &f.ctx(),
            &update("db1.c1", doc! {}, doc! { "$inc": { "v": 1 } }, 0),
        )
        .unwrap_err();

        let reply = error_reply(&err);
        assert!(reply.get_str("errmsg").unwrap().contains("$inc"));
        assert_eq!(reply.get_i32("ok").unwrap(), 0);

        let last = f.store.db("db1").last_error().unwrap();
        assert!(last.get_str("errmsg").unwrap().contains("$inc"));
        assert_eq!(last.get_i32("ok").unwrap(), 0);
    }

    #[test]
    fn system_namespaces_lists_collections() {
        let f = Fixture::new();
        handle_insert(&f.ctx(), &insert("db1.c1", vec![doc! { "a": 1 }])).unwrap();
        handle_insert(&f.ctx(), &insert("db1.c2", vec![doc! { "b": 2 }])).unwrap();

        let mut names: Vec<String> = reply_docs(
            handle_query(&f.ctx(), &query("db1.system.namespaces", doc! {})).unwrap(),
        )
        .into_iter()
        .map(|doc| doc.get_str("name").unwrap().to_string())
        .collect();
        names.sort();
        assert_eq!(names, vec!["c1".to_string(), "c2".to_string()]);

        let err =
            handle_query(&f.ctx(), &query("db1.system.indexes", doc! {})).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSystemQuery { .. }));
    }

    #[test]
    fn count_command_counts_matches() {
        let f = Fixture::new();
        handle_insert(
            &f.ctx(),
            &insert(
                "db1.c1",
                vec![
                    doc! { "artist": "ed hall" },
                    doc! { "artist": "cherubs" },
                ],
            ),
        )
        .unwrap();

        let docs = reply_docs(
            handle_query(
                &f.ctx(),
                &query("db1.$cmd", doc! { "count": "c1", "query": { "artist": "ed hall" } }),
            )
            .unwrap(),
        );
        assert_eq!(docs[0].get_i32("n").unwrap(), 1);
        assert_eq!(docs[0].get_i32("ok").unwrap(), 1);
    }

    #[test]
    fn get_last_error_reflects_the_most_recent_write() {
        let f = Fixture::new();

        // Nothing written yet: the reply carries no documents.
        let docs = reply_docs(
            handle_query(&f.ctx(), &query("db1.$cmd", doc! { "getLastError": 1 })).unwrap(),
        );
        assert!(docs.is_empty());

        handle_insert(&f.ctx(), &insert("db1.c1", vec![doc! { "a": 1 }])).unwrap();
        let docs = reply_docs(
            handle_query(&f.ctx(), &query("db1.$cmd", doc! { "getLastError": 1 })).unwrap(),
        );
        assert_eq!(docs, vec![Document::new()]);
    }

    #[test]
    fn shutdown_command_cancels_and_closes() {
        let f = Fixture::new();
        let action =
            handle_query(&f.ctx(), &query("admin.$cmd", doc! { "shutdown": 1 })).unwrap();
        assert_eq!(action, Action::Shutdown);
        assert!(f.shutdown.is_cancelled());
    }

    #[test]
    fn admin_queries_outside_cmd_are_malformed_or_rejected() {
        let f = Fixture::new();
        // admin.$cmd routes to commands; a plain query on an admin collection
        // is served like any other namespace.
        let docs = reply_docs(handle_query(&f.ctx(), &query("admin.foo", doc! {})).unwrap());
        assert!(docs.is_empty());
    }

    #[test]
    fn queries_with_selector_on_absent_key_match_nothing() {
        let f = Fixture::new();
        handle_insert(&f.ctx(), &insert("db1.c1", vec![doc! { "foo": 1 }])).unwrap();

        let docs = reply_docs(
            handle_query(&f.ctx(), &query("db1.c1", doc! { "nope": 1 })).unwrap(),
        );
        assert!(docs.is_empty());
    }

    #[test]
    fn upsert_spec_with_explicit_id_keeps_it() {
        let f = Fixture::new();
        handle_update(
            &f.ctx(),
            &update(
                "db1.c1",
                doc! { "k": "missing" },
                doc! { "_id": "fixed", "k": "missing" },
                crate::frame::UPDATE_FLAG_UPSERT,
            ),
        )
        .unwrap();

        let last = f.store.db("db1").last_error().unwrap();
        assert_eq!(last.get_str("upserted").unwrap(), "fixed");

        let id = Bson::String("fixed".to_string());
        assert!(f.store.db("db1").collection("c1").get(&id).is_some());
    }
}
