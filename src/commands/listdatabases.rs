use bson::doc;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

#[derive(Debug, PartialEq)]
pub struct ListDatabases;

impl Executable for ListDatabases {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        let databases: Vec<_> = ctx
            .store
            .db_names()
            .into_iter()
            .map(|name| {
                let empty = ctx.store.db(&name).is_empty();
                doc! { "name": name, "empty": empty }
            })
            .collect();

        Ok(Outcome::doc(doc! { "databases": databases, "ok": 1 }))
    }
}
