use bson::doc;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

#[derive(Debug, PartialEq)]
pub struct Ping;

impl Executable for Ping {
    fn exec(self, _ctx: &Context) -> Result<Outcome, Error> {
        Ok(Outcome::doc(doc! { "ok": 1 }))
    }
}
