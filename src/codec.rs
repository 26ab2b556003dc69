use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::frame::{self, Header, RawMessage, HEADER_LEN};
use crate::Error;

/// Splits the incoming byte stream into whole frames: a little-endian length
/// prefix covering the 16-byte header plus the body.
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = RawMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = i32::from_le_bytes(src[..4].try_into().expect("4-byte slice"));
        if length < HEADER_LEN as i32 {
            return Err(frame::Error::InvalidMessageLength(length).into());
        }
        let length = length as usize;

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let whole = src.split_to(length).freeze();
        let mut header_bytes = &whole[..HEADER_LEN];
        let header = Header::parse(&mut header_bytes)?;

        Ok(Some(RawMessage {
            header,
            body: whole.slice(HEADER_LEN..),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;
    use bson::doc;

    #[test]
    fn decode_waits_for_a_whole_frame() {
        let query = frame::OpQuery {
            request_id: 1,
            flags: 0,
            full_collection_name: "db1.c1".to_string(),
            number_to_skip: 0,
            number_to_return: 0,
            query: doc! {},
            return_fields: None,
        };
        let bytes = query.encode().unwrap();

        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();

        // Feed the frame a few bytes at a time; nothing decodes until the
        // last chunk lands.
        for chunk in bytes.chunks(5) {
            assert!(codec.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(chunk);
        }

        let raw = codec.decode(&mut buf).unwrap().expect("a whole frame");
        assert_eq!(raw.header.op_code, i32::from(OpCode::Query));
        assert_eq!(raw.header.length as usize, bytes.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_leaves_following_frames_in_the_buffer() {
        let query = frame::OpQuery {
            request_id: 2,
            flags: 0,
            full_collection_name: "db1.c1".to_string(),
            number_to_skip: 0,
            number_to_return: 0,
            query: doc! { "foo": 1 },
            return_fields: None,
        };
        let bytes = query.encode().unwrap();

        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes);
        buf.extend_from_slice(&bytes);

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert_eq!(buf.len(), bytes.len());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_sub_header_lengths() {
        let mut codec = MessageCodec;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3i32.to_le_bytes());
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(-8i32).to_le_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }
}
