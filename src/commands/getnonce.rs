use bson::doc;
use rand::Rng;

use crate::commands::executable::Executable;
use crate::commands::{Context, Outcome};
use crate::handler::Error;

/// Hands out a fresh nonce. Authentication itself is not implemented; the
/// nonce exists so handshake-happy clients get a well-formed answer.
#[derive(Debug, PartialEq)]
pub struct GetNonce;

impl Executable for GetNonce {
    fn exec(self, _ctx: &Context) -> Result<Outcome, Error> {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill(&mut nonce[..]);
        Ok(Outcome::doc(doc! {
            "nonce": hex::encode(nonce),
            "ok": 1,
        }))
    }
}
