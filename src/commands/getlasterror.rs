use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Returns the database's last-error slot: the outcome of the most recent
/// write to the database, from any connection. The reply carries no
/// documents while nothing has been written.
#[derive(Debug, PartialEq)]
pub struct GetLastError {
    pub db: String,
}

impl Executable for GetLastError {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        let docs = match ctx.store.db(&self.db).last_error() {
            Some(doc) => vec![doc],
            None => vec![],
        };
        Ok(Outcome::Reply(docs))
    }
}
