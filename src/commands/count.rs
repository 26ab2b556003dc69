use bson::{doc, Document};

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::frame::OpQuery;
use crate::handler::Error;

/// Counts the documents of a collection, optionally narrowed by a selector
/// in the command document's `query` field.
#[derive(Debug, PartialEq)]
pub struct Count {
    pub db: String,
    pub collection: String,
    pub query: Option<Document>,
}

impl Count {
    pub fn parse(db: &str, query: &OpQuery) -> Result<Count, Error> {
        let collection = query
            .command()
            .and_then(|(_, arg)| arg.as_str())
            .ok_or_else(|| {
                Error::BadInput(format!("malformed count command: {:?}", query.query))
            })?;

        let selector = match query.get("query") {
            None => None,
            Some(value) => Some(
                value
                    .as_document()
                    .ok_or_else(|| {
                        Error::BadInput(format!("malformed count command: {:?}", query.query))
                    })?
                    .clone(),
            ),
        };

        Ok(Count {
            db: db.to_string(),
            collection: collection.to_string(),
            query: selector,
        })
    }
}

impl Executable for Count {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        let coll = ctx.store.db(&self.db).collection(&self.collection);
        let n = coll.count(self.query.as_ref()) as i32;
        Ok(Outcome::doc(doc! { "n": n, "ok": 1 }))
    }
}
