use bson::doc;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::frame::OpQuery;
use crate::handler::Error;

/// The server keeps no logs for clients; `getLog` answers with the shapes
/// drivers probe for at connection time.
#[derive(Debug, PartialEq)]
pub struct GetLog {
    pub name: String,
}

impl TryFrom<&OpQuery> for GetLog {
    type Error = Error;

    fn try_from(query: &OpQuery) -> Result<Self, Self::Error> {
        let name = query
            .command()
            .and_then(|(_, arg)| arg.as_str())
            .ok_or_else(|| Error::BadInput("getLog requires a string argument".to_string()))?;
        Ok(GetLog {
            name: name.to_string(),
        })
    }
}

impl Executable for GetLog {
    fn exec(self, _ctx: &Context) -> Result<Outcome, Error> {
        let reply = match self.name.as_str() {
            "*" => doc! { "names": ["startupWarnings"], "ok": 1 },
            "startupWarnings" => doc! {
                "totalLinesWritten": 0,
                "log": [],
                "ok": 1,
            },
            name => doc! { "errmsg": format!("log not found: {name:?}"), "ok": 0 },
        };
        Ok(Outcome::doc(reply))
    }
}
