use bson::doc;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Echoes the client's remote address. This reply carries no `ok` field.
#[derive(Debug, PartialEq)]
pub struct WhatsMyUri;

impl Executable for WhatsMyUri {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        Ok(Outcome::doc(doc! { "you": ctx.client_addr.to_string() }))
    }
}
