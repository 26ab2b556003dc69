// Legacy wire protocol framing: a 16-byte little-endian header followed by an
// opcode-specific body carrying BSON documents.

use std::io::Cursor;
use std::sync::atomic::{AtomicI32, Ordering};

use bson::Document;
use bytes::Bytes;
use thiserror::Error as ThisError;

pub const HEADER_LEN: usize = 16;

/// Process-wide counter for server-originated request ids. The first reply
/// carries id 1.
static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("truncated message")]
    Truncated,
    #[error("invalid message length {0}")]
    InvalidMessageLength(i32),
    #[error("malformed document: {0}")]
    MalformedDocument(#[from] bson::de::Error),
    #[error("document encode failed: {0}")]
    EncodeDocument(#[from] bson::ser::Error),
    #[error("unsupported op code {0}")]
    UnsupportedOpcode(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Reply,       // 1
    Msg,         // 1000
    Update,      // 2001
    Insert,      // 2002
    Query,       // 2004
    GetMore,     // 2005
    Delete,      // 2006
    KillCursors, // 2007
}

impl TryFrom<i32> for OpCode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Reply),
            1000 => Ok(Self::Msg),
            2001 => Ok(Self::Update),
            2002 => Ok(Self::Insert),
            2004 => Ok(Self::Query),
            2005 => Ok(Self::GetMore),
            2006 => Ok(Self::Delete),
            2007 => Ok(Self::KillCursors),
            code => Err(Error::UnsupportedOpcode(code)),
        }
    }
}

impl From<OpCode> for i32 {
    fn from(op: OpCode) -> i32 {
        match op {
            OpCode::Reply => 1,
            OpCode::Msg => 1000,
            OpCode::Update => 2001,
            OpCode::Insert => 2002,
            OpCode::Query => 2004,
            OpCode::GetMore => 2005,
            OpCode::Delete => 2006,
            OpCode::KillCursors => 2007,
        }
    }
}

/// The fixed message header. `length` is the total frame length including the
/// header itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl Header {
    pub fn parse(src: &mut &[u8]) -> Result<Header, Error> {
        Ok(Header {
            length: get_i32(src)?,
            request_id: get_i32(src)?,
            response_to: get_i32(src)?,
            op_code: get_i32(src)?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&self.op_code.to_le_bytes());
    }
}

/// A whole frame as it came off the wire: parsed header plus the unparsed
/// body bytes.
#[derive(Clone, Debug)]
pub struct RawMessage {
    pub header: Header,
    pub body: Bytes,
}

/// A client request, parsed per opcode.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Query(OpQuery),
    Insert(OpInsert),
    Update(OpUpdate),
}

impl TryFrom<RawMessage> for Request {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match OpCode::try_from(raw.header.op_code)? {
            OpCode::Query => Ok(Request::Query(OpQuery::parse(&raw.header, &raw.body)?)),
            OpCode::Insert => Ok(Request::Insert(OpInsert::parse(&raw.header, &raw.body)?)),
            OpCode::Update => Ok(Request::Update(OpUpdate::parse(&raw.header, &raw.body)?)),
            // Recognised but not served; the framing after such a message is
            // not trustworthy, so the caller closes the connection.
            other => Err(Error::UnsupportedOpcode(other.into())),
        }
    }
}

impl Request {
    pub fn request_id(&self) -> i32 {
        match self {
            Request::Query(q) => q.request_id,
            Request::Insert(i) => i.request_id,
            Request::Update(u) => u.request_id,
        }
    }
}

pub const INSERT_FLAG_CONTINUE_ON_ERROR: i32 = 1;

pub const UPDATE_FLAG_UPSERT: i32 = 1;
pub const UPDATE_FLAG_MULTI: i32 = 1 << 1;

/// OP_QUERY: flags, namespace, skip, return count, query document and an
/// optional field selector.
#[derive(Clone, Debug, PartialEq)]
pub struct OpQuery {
    pub request_id: i32,
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub return_fields: Option<Document>,
}

impl OpQuery {
    pub fn parse(header: &Header, mut body: &[u8]) -> Result<OpQuery, Error> {
        let src = &mut body;
        let flags = get_i32(src)?;
        let full_collection_name = get_cstring(src)?;
        let number_to_skip = get_i32(src)?;
        let number_to_return = get_i32(src)?;
        let query = get_document(src)?;
        let return_fields = if src.is_empty() {
            None
        } else {
            Some(get_document(src)?)
        };
        Ok(OpQuery {
            request_id: header.request_id,
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query,
            return_fields,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.to_le_bytes());
        put_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.number_to_skip.to_le_bytes());
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        self.query.to_writer(&mut body)?;
        if let Some(fields) = &self.return_fields {
            fields.to_writer(&mut body)?;
        }
        Ok(finish_frame(self.request_id, 0, OpCode::Query, body))
    }

    /// The command encoded by this query: name and argument of the first
    /// field of the query document.
    pub fn command(&self) -> Option<(&str, &bson::Bson)> {
        self.query.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&bson::Bson> {
        self.query.get(key)
    }
}

/// OP_INSERT: flags, namespace, then documents to the end of the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct OpInsert {
    pub request_id: i32,
    pub flags: i32,
    pub full_collection_name: String,
    pub documents: Vec<Document>,
}

impl OpInsert {
    pub fn parse(header: &Header, mut body: &[u8]) -> Result<OpInsert, Error> {
        let src = &mut body;
        let flags = get_i32(src)?;
        let full_collection_name = get_cstring(src)?;
        let mut documents = Vec::new();
        while !src.is_empty() {
            documents.push(get_document(src)?);
        }
        Ok(OpInsert {
            request_id: header.request_id,
            flags,
            full_collection_name,
            documents,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.to_le_bytes());
        put_cstring(&mut body, &self.full_collection_name);
        for doc in &self.documents {
            doc.to_writer(&mut body)?;
        }
        Ok(finish_frame(self.request_id, 0, OpCode::Insert, body))
    }

    pub fn continue_on_error(&self) -> bool {
        self.flags & INSERT_FLAG_CONTINUE_ON_ERROR != 0
    }
}

/// OP_UPDATE: reserved zero, namespace, flags, selector and update spec.
#[derive(Clone, Debug, PartialEq)]
pub struct OpUpdate {
    pub request_id: i32,
    pub full_collection_name: String,
    pub flags: i32,
    pub selector: Document,
    pub update: Document,
}

impl OpUpdate {
    pub fn parse(header: &Header, mut body: &[u8]) -> Result<OpUpdate, Error> {
        let src = &mut body;
        let _zero = get_i32(src)?;
        let full_collection_name = get_cstring(src)?;
        let flags = get_i32(src)?;
        if src.is_empty() {
            return Err(Error::Truncated);
        }
        let selector = get_document(src)?;
        if src.is_empty() {
            return Err(Error::Truncated);
        }
        let update = get_document(src)?;
        Ok(OpUpdate {
            request_id: header.request_id,
            full_collection_name,
            flags,
            selector,
            update,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        put_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.flags.to_le_bytes());
        self.selector.to_writer(&mut body)?;
        self.update.to_writer(&mut body)?;
        Ok(finish_frame(self.request_id, 0, OpCode::Update, body))
    }

    pub fn upsert(&self) -> bool {
        self.flags & UPDATE_FLAG_UPSERT != 0
    }

    pub fn multi(&self) -> bool {
        self.flags & UPDATE_FLAG_MULTI != 0
    }
}

/// OP_REPLY: the single server→client message. `number_returned` is derived
/// from the document count on encode.
#[derive(Clone, Debug, PartialEq)]
pub struct OpReply {
    pub request_id: i32,
    pub response_to: i32,
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl OpReply {
    /// Build a reply to the given request, drawing a fresh request id from
    /// the process-wide counter.
    pub fn new(response_to: i32, documents: Vec<Document>) -> OpReply {
        OpReply {
            request_id: next_request_id(),
            response_to,
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents,
        }
    }

    pub fn parse(header: &Header, mut body: &[u8]) -> Result<OpReply, Error> {
        let src = &mut body;
        let response_flags = get_i32(src)?;
        let cursor_id = get_i64(src)?;
        let starting_from = get_i32(src)?;
        let number_returned = get_i32(src)?;
        let mut documents = Vec::new();
        for _ in 0..number_returned {
            if src.is_empty() {
                return Err(Error::Truncated);
            }
            documents.push(get_document(src)?);
        }
        Ok(OpReply {
            request_id: header.request_id,
            response_to: header.response_to,
            response_flags,
            cursor_id,
            starting_from,
            documents,
        })
    }

    /// Serializes the body first so the header can carry the total length.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.response_flags.to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        body.extend_from_slice(&self.starting_from.to_le_bytes());
        body.extend_from_slice(&(self.documents.len() as i32).to_le_bytes());
        for doc in &self.documents {
            doc.to_writer(&mut body)?;
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        let header = Header {
            length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: OpCode::Reply.into(),
        };
        header.write_to(&mut frame);
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

fn finish_frame(request_id: i32, response_to: i32, op: OpCode, body: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    let header = Header {
        length: (HEADER_LEN + body.len()) as i32,
        request_id,
        response_to,
        op_code: op.into(),
    };
    header.write_to(&mut frame);
    frame.extend_from_slice(&body);
    frame
}

fn get_i32(src: &mut &[u8]) -> Result<i32, Error> {
    if src.len() < 4 {
        return Err(Error::Truncated);
    }
    let (head, rest) = src.split_at(4);
    *src = rest;
    Ok(i32::from_le_bytes(head.try_into().expect("4-byte split")))
}

fn get_i64(src: &mut &[u8]) -> Result<i64, Error> {
    if src.len() < 8 {
        return Err(Error::Truncated);
    }
    let (head, rest) = src.split_at(8);
    *src = rest;
    Ok(i64::from_le_bytes(head.try_into().expect("8-byte split")))
}

fn get_cstring(src: &mut &[u8]) -> Result<String, Error> {
    let nul = src.iter().position(|&b| b == 0).ok_or(Error::Truncated)?;
    let s = String::from_utf8_lossy(&src[..nul]).into_owned();
    *src = &src[nul + 1..];
    Ok(s)
}

/// Reads one embedded document, consuming its self-declared length. A length
/// running past the end of the frame is clamped to the remaining bytes.
fn get_document(src: &mut &[u8]) -> Result<Document, Error> {
    if src.len() < 4 {
        return Err(Error::Truncated);
    }
    let declared = i32::from_le_bytes(src[..4].try_into().expect("4-byte slice"));
    let len = (declared.max(0) as usize).min(src.len());
    let doc = Document::from_reader(&mut Cursor::new(&src[..len]))?;
    *src = &src[len..];
    Ok(doc)
}

fn put_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}
