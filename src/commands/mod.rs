pub mod count;
pub mod executable;
pub mod getlasterror;
pub mod getlog;
pub mod getnonce;
pub mod ismaster;
pub mod listdatabases;
pub mod ping;
pub mod replsetgetstatus;
pub mod shutdown;
pub mod whatsmyuri;

use std::net::SocketAddr;

use bson::Document;
use tokio_util::sync::CancellationToken;

use crate::commands::executable::Executable;
use crate::frame::OpQuery;
use crate::handler::Error;
use crate::store::Store;

use count::Count;
use getlasterror::GetLastError;
use getlog::GetLog;
use getnonce::GetNonce;
use ismaster::IsMaster;
use listdatabases::ListDatabases;
use ping::Ping;
use replsetgetstatus::ReplSetGetStatus;
use shutdown::Shutdown;
use whatsmyuri::WhatsMyUri;

/// Everything a command may touch while executing.
pub struct Context<'a> {
    pub store: &'a Store,
    pub client_addr: SocketAddr,
    pub shutdown: &'a CancellationToken,
}

/// What a command asks the connection loop to do next.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Reply(Vec<Document>),
    /// Orderly shutdown was requested; close this connection without a reply.
    Shutdown,
}

impl Outcome {
    fn doc(doc: Document) -> Outcome {
        Outcome::Reply(vec![doc])
    }
}

/// A command addressed to `admin.$cmd`. The command is named by the first
/// field of the query document, so field order must survive decoding.
#[derive(Debug, PartialEq)]
pub enum AdminCommand {
    IsMaster(IsMaster),
    Ping(Ping),
    WhatsMyUri(WhatsMyUri),
    GetNonce(GetNonce),
    ListDatabases(ListDatabases),
    GetLog(GetLog),
    ReplSetGetStatus(ReplSetGetStatus),
    Shutdown(Shutdown),
}

impl TryFrom<&OpQuery> for AdminCommand {
    type Error = Error;

    fn try_from(query: &OpQuery) -> Result<Self, Self::Error> {
        let name = query.command().map(|(name, _)| name).unwrap_or("");
        match name {
            "ismaster" => Ok(AdminCommand::IsMaster(IsMaster)),
            "ping" => Ok(AdminCommand::Ping(Ping)),
            "whatsmyuri" => Ok(AdminCommand::WhatsMyUri(WhatsMyUri)),
            "getnonce" => Ok(AdminCommand::GetNonce(GetNonce)),
            "listDatabases" => Ok(AdminCommand::ListDatabases(ListDatabases)),
            "getLog" => GetLog::try_from(query).map(AdminCommand::GetLog),
            "replSetGetStatus" => Ok(AdminCommand::ReplSetGetStatus(ReplSetGetStatus)),
            "shutdown" => Ok(AdminCommand::Shutdown(Shutdown)),
            name => Err(Error::UnsupportedCommand {
                scope: "admin",
                name: name.to_string(),
            }),
        }
    }
}

impl Executable for AdminCommand {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        match self {
            AdminCommand::IsMaster(cmd) => cmd.exec(ctx),
            AdminCommand::Ping(cmd) => cmd.exec(ctx),
            AdminCommand::WhatsMyUri(cmd) => cmd.exec(ctx),
            AdminCommand::GetNonce(cmd) => cmd.exec(ctx),
            AdminCommand::ListDatabases(cmd) => cmd.exec(ctx),
            AdminCommand::GetLog(cmd) => cmd.exec(ctx),
            AdminCommand::ReplSetGetStatus(cmd) => cmd.exec(ctx),
            AdminCommand::Shutdown(cmd) => cmd.exec(ctx),
        }
    }
}

/// A command addressed to `<db>.$cmd`.
#[derive(Debug, PartialEq)]
pub enum DbCommand {
    GetLastError(GetLastError),
    Count(Count),
}

impl DbCommand {
    pub fn parse(db: &str, query: &OpQuery) -> Result<DbCommand, Error> {
        let name = query.command().map(|(name, _)| name).unwrap_or("");
        match name {
            "getLastError" | "getlasterror" => Ok(DbCommand::GetLastError(GetLastError {
                db: db.to_string(),
            })),
            "count" => Count::parse(db, query).map(DbCommand::Count),
            name => Err(Error::UnsupportedCommand {
                scope: "db",
                name: name.to_string(),
            }),
        }
    }
}

impl Executable for DbCommand {
    fn exec(self, ctx: &Context) -> Result<Outcome, Error> {
        match self {
            DbCommand::GetLastError(cmd) => cmd.exec(ctx),
            DbCommand::Count(cmd) => cmd.exec(ctx),
        }
    }
}
