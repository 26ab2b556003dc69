use crate::commands::{Context, Outcome};
use crate::handler::Error;

pub trait Executable {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error>;
}
