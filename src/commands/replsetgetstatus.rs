use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Replica sets are never configured on this server.
#[derive(Debug, PartialEq)]
pub struct ReplSetGetStatus;

impl Executable for ReplSetGetStatus {
    fn exec(self, _ctx: &Context) -> Result<Outcome, Error> {
        Err(Error::Stub("not running with --replSet"))
    }
}
