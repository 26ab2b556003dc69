use tracing::info;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Raises the server-wide shutdown signal. The issuing connection is closed
/// without a reply; every other connection exits at the top of its read loop.
#[derive(Debug, PartialEq)]
pub struct Shutdown;

impl Executable for Shutdown {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        info!("shutdown requested");
        ctx.shutdown.cancel();
        Ok(Outcome::Shutdown)
    }
}
