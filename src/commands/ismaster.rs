use bson::doc;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Always reports this server as the master; there are no replicas to defer
/// to.
#[derive(Debug, PartialEq)]
pub struct IsMaster;

impl Executable for IsMaster {
    fn exec(self, _ctx: &Context) -> Result<Outcome, Error> {
        Ok(Outcome::doc(doc! { "ismaster": true, "ok": 1 }))
    }
}
