//! Binary wire codec for [`Message`].
//!
//! Frame layout (all integers big-endian):
//!
//! | Field     | Size          | Notes                                    |
//! |-----------|---------------|------------------------------------------|
//! | length    | u32           | length of the body that follows          |
//! | role      | u8            | [`Role`] tag                             |
//! | kind      | u8            | [`MessageKind`] tag                      |
//! | timestamp | i64           | microseconds since the Unix epoch        |
//! | count     | u8            | number of addresses, at most 16          |
//! | addresses | count x (u16 + bytes) | UTF-8, at most 256 bytes each    |
//!
//! `delivered` is receiver-side state and is never encoded. Bounds are
//! enforced on both encode and decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;

use timekeeper_common::{CodecError, MAX_ADDRESS_LENGTH, MAX_ADDRESSES};

use crate::model::{Address, Message, MessageKind, Role};

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Size of the fixed part of a body (role, kind, timestamp, count)
const FIXED_BODY_LEN: usize = 1 + 1 + 8 + 1;

/// Largest body a valid message can produce
pub const MAX_BODY_LEN: usize = FIXED_BODY_LEN + MAX_ADDRESSES * (2 + MAX_ADDRESS_LENGTH);

/// Encode the body of a message (without the length prefix)
pub fn encode_body(message: &Message) -> Result<Bytes, CodecError> {
    message.validate()?;

    let addresses_len: usize = message.addresses.iter().map(|a| 2 + a.as_str().len()).sum();
    let mut buf = BytesMut::with_capacity(FIXED_BODY_LEN + addresses_len);

    buf.put_u8(message.role.as_u8());
    buf.put_u8(message.kind.as_u8());
    buf.put_i64(message.timestamp.timestamp_micros());
    buf.put_u8(message.addresses.len() as u8);
    for address in &message.addresses {
        let raw = address.as_str().as_bytes();
        buf.put_u16(raw.len() as u16);
        buf.put_slice(raw);
    }

    Ok(buf.freeze())
}

/// Encode a complete frame: length prefix followed by the body
pub fn encode_frame(message: &Message) -> Result<Bytes, CodecError> {
    let body = encode_body(message)?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Validate a length prefix read from the wire
pub fn check_body_len(len: u32) -> Result<usize, CodecError> {
    let len = len as usize;
    if len > MAX_BODY_LEN {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_BODY_LEN,
        });
    }
    if len < FIXED_BODY_LEN {
        return Err(CodecError::Truncated {
            needed: FIXED_BODY_LEN - len,
        });
    }
    Ok(len)
}

/// Decode a message body. The returned message is marked delivered.
pub fn decode_body(mut buf: impl Buf) -> Result<Message, CodecError> {
    ensure_remaining(&buf, FIXED_BODY_LEN)?;

    let role = Role::try_from(buf.get_u8())?;
    let kind = MessageKind::try_from(buf.get_u8())?;
    let micros = buf.get_i64();
    let timestamp =
        DateTime::from_timestamp_micros(micros).ok_or(CodecError::InvalidTimestamp(micros))?;

    let count = buf.get_u8() as usize;
    if count > MAX_ADDRESSES {
        return Err(CodecError::TooManyAddresses {
            count,
            max: MAX_ADDRESSES,
        });
    }

    let mut addresses = Vec::with_capacity(count);
    for _ in 0..count {
        ensure_remaining(&buf, 2)?;
        let len = buf.get_u16() as usize;
        if len > MAX_ADDRESS_LENGTH {
            return Err(CodecError::AddressTooLong {
                length: len,
                max: MAX_ADDRESS_LENGTH,
            });
        }
        ensure_remaining(&buf, len)?;
        let mut raw = vec![0u8; len];
        buf.copy_to_slice(&mut raw);
        let raw = String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        addresses.push(Address::new(raw));
    }

    Ok(Message {
        role,
        kind,
        timestamp,
        addresses,
        delivered: true,
    })
}

/// Decode a complete frame, length prefix included
pub fn decode_frame(mut buf: impl Buf) -> Result<Message, CodecError> {
    ensure_remaining(&buf, FRAME_HEADER_LEN)?;
    let len = check_body_len(buf.get_u32())?;
    ensure_remaining(&buf, len)?;
    decode_body(buf.take(len))
}

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_set_server() -> Message {
        Message::set_server(vec![
            Address::from("n1"),
            Address::from("/tmp/timekeeper/4242.sock"),
            Address::from("127.0.0.1:47001"),
        ])
    }

    #[test]
    fn test_frame_roundtrip_marks_delivered() {
        let message = sample_set_server();
        let frame = encode_frame(&message).unwrap();
        let decoded = decode_frame(frame).unwrap();

        assert!(decoded.delivered);
        assert_eq!(decoded.role, Role::Controller);
        assert_eq!(decoded.kind, MessageKind::SetServer);
        assert_eq!(decoded.addresses, message.addresses);
        assert_eq!(
            decoded.timestamp.timestamp_micros(),
            message.timestamp.timestamp_micros()
        );
    }

    #[test]
    fn test_delivered_flag_not_transmitted() {
        let message = sample_set_server();
        assert_eq!(
            encode_body(&message.clone().mark_delivered()).unwrap(),
            encode_body(&message).unwrap()
        );
    }

    #[test]
    fn test_encode_rejects_seventeen_addresses() {
        let addresses = (0..17).map(|i| Address::new(format!("n{}", i))).collect();
        let result = encode_frame(&Message::set_server(addresses));
        assert_eq!(
            result,
            Err(CodecError::TooManyAddresses { count: 17, max: 16 })
        );
    }

    #[test]
    fn test_encode_rejects_oversized_address() {
        let message = Message::new_client(Address::new("a".repeat(257)));
        assert_eq!(
            encode_frame(&message),
            Err(CodecError::AddressTooLong {
                length: 257,
                max: 256
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_role() {
        let mut frame = BytesMut::from(&encode_body(&Message::test_controller()).unwrap()[..]);
        frame[0] = 9;
        assert_eq!(decode_body(frame.freeze()), Err(CodecError::UnknownRole(9)));
    }

    #[test]
    fn test_decode_rejects_truncated_address() {
        let body = encode_body(&sample_set_server()).unwrap();
        let truncated = body.slice(..body.len() - 3);
        assert!(matches!(
            decode_body(truncated),
            Err(CodecError::Truncated { needed: 3 })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_count() {
        let mut buf = BytesMut::new();
        buf.put_u8(Role::Controller.as_u8());
        buf.put_u8(MessageKind::SetServer.as_u8());
        buf.put_i64(0);
        buf.put_u8(17);
        assert!(matches!(
            decode_body(buf.freeze()),
            Err(CodecError::TooManyAddresses { count: 17, .. })
        ));
    }

    #[test]
    fn test_check_body_len_bounds() {
        assert!(check_body_len(MAX_BODY_LEN as u32).is_ok());
        assert!(matches!(
            check_body_len(MAX_BODY_LEN as u32 + 1),
            Err(CodecError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            check_body_len(2),
            Err(CodecError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_valid_messages_survive_the_wire(
            role in 0u8..3,
            kind in 0u8..4,
            micros in -1_000_000_000_000i64..4_000_000_000_000_000i64,
            raw in proptest::collection::vec("[a-z0-9:/._-]{0,256}", 0..=16),
        ) {
            let message = Message {
                role: Role::try_from(role).unwrap(),
                kind: MessageKind::try_from(kind).unwrap(),
                timestamp: DateTime::from_timestamp_micros(micros).unwrap(),
                addresses: raw.into_iter().map(Address::new).collect(),
                delivered: false,
            };
            let decoded = decode_frame(encode_frame(&message).unwrap()).unwrap();
            prop_assert_eq!(decoded, message.mark_delivered());
        }
    }
}
