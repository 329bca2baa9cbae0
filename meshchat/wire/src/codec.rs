//! Binary message codec.
//!
//! Encoding is deterministic and round-trip exact for every field except the
//! delivery status, which is receiver-local: it is excluded from the wire
//! form and reset to pending on decode. See the crate docs for the byte
//! table.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::WireError;
use crate::message::{DeliveryStatus, MeshMessage, MessageType, MAX_CONTENT_LEN, MAX_NAME_LEN};

/// Length of the fixed portion of an encoded message (everything before the
/// sender-name bytes)
pub const HEADER_LEN: usize = 62;

/// Encode a message to its wire form.
///
/// Fails when the sender name or content exceed their length prefixes; all
/// other fields are fixed width.
pub fn encode(msg: &MeshMessage) -> Result<Bytes, WireError> {
    let name = msg.sender_name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(WireError::NameTooLong(name.len()));
    }
    let content = msg.content.as_bytes();
    if content.len() > MAX_CONTENT_LEN {
        return Err(WireError::ContentTooLong(content.len()));
    }

    let route = msg
        .route_path
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut buf = BytesMut::with_capacity(HEADER_LEN + name.len() + content.len() + route.len());
    buf.put_slice(msg.id.as_bytes());
    buf.put_u16(msg.kind as u16);
    buf.put_u8(msg.ttl);
    buf.put_u32(msg.sequence);
    buf.put_slice(msg.sender.as_bytes());
    buf.put_slice(msg.recipient.unwrap_or(Uuid::nil()).as_bytes());
    buf.put_u32(msg.timestamp);
    buf.put_u16(content.len() as u16);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_slice(content);
    buf.put_slice(route.as_bytes());

    Ok(buf.freeze())
}

/// Decode a message from its wire form.
///
/// The input must contain exactly one encoded message: the trailing route
/// path consumes whatever remains of the buffer.
pub fn decode(data: &[u8]) -> Result<MeshMessage, WireError> {
    let mut buf = Bytes::copy_from_slice(data);
    if buf.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }

    let id = get_uuid(&mut buf);
    let kind = MessageType::try_from(buf.get_u16())?;
    let ttl = buf.get_u8();
    let sequence = buf.get_u32();
    let sender = get_uuid(&mut buf);
    let recipient_raw = get_uuid(&mut buf);
    let recipient = if recipient_raw.is_nil() {
        None
    } else {
        Some(recipient_raw)
    };
    let timestamp = buf.get_u32();
    let content_len = buf.get_u16() as usize;
    let name_len = buf.get_u8() as usize;

    if buf.remaining() < name_len + content_len {
        return Err(WireError::Truncated);
    }
    let sender_name = take_utf8(&mut buf, name_len)?;
    let content = take_utf8(&mut buf, content_len)?;

    let rest = buf.remaining();
    let route_raw = take_utf8(&mut buf, rest)?;
    let route_path = if route_raw.is_empty() {
        Vec::new()
    } else {
        route_raw
            .split(',')
            .map(|s| Uuid::parse_str(s).map_err(|_| WireError::Malformed))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(MeshMessage {
        id,
        sender,
        sender_name,
        recipient,
        content,
        kind,
        timestamp,
        ttl,
        sequence,
        route_path,
        status: DeliveryStatus::Pending,
    })
}

fn get_uuid(buf: &mut Bytes) -> Uuid {
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Uuid::from_bytes(raw)
}

fn take_utf8(buf: &mut Bytes, len: usize) -> Result<String, WireError> {
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeshMessage {
        let mut msg = MeshMessage::new(
            MessageType::Text,
            Uuid::new_v4(),
            "alice",
            Some(Uuid::new_v4()),
            "hello out there",
            1_700_000_000,
        );
        msg.sequence = 7;
        msg.ttl = 3;
        msg.route_path = vec![msg.sender, Uuid::new_v4()];
        msg
    }

    #[test]
    fn test_round_trip() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.sender, msg.sender);
        assert_eq!(decoded.sender_name, msg.sender_name);
        assert_eq!(decoded.recipient, msg.recipient);
        assert_eq!(decoded.content, msg.content);
        assert_eq!(decoded.kind, msg.kind);
        assert_eq!(decoded.timestamp, msg.timestamp);
        assert_eq!(decoded.ttl, msg.ttl);
        assert_eq!(decoded.sequence, msg.sequence);
        assert_eq!(decoded.route_path, msg.route_path);
    }

    #[test]
    fn test_status_resets_to_pending() {
        let msg = sample().with_status(DeliveryStatus::Delivered);
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.status, DeliveryStatus::Pending);
    }

    #[test]
    fn test_broadcast_recipient_is_zero_uuid() {
        let mut msg = sample();
        msg.recipient = None;
        let bytes = encode(&msg).unwrap();
        // recipient field sits at offset 39
        assert!(bytes[39..55].iter().all(|&b| b == 0));
        assert_eq!(decode(&bytes).unwrap().recipient, None);
    }

    #[test]
    fn test_empty_route_path_and_content() {
        let mut msg = sample();
        msg.route_path.clear();
        msg.content.clear();
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert!(decoded.route_path.is_empty());
        assert!(decoded.content.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes[..HEADER_LEN - 1]).unwrap_err(), WireError::Truncated);
    }

    #[test]
    fn test_truncated_variable_fields() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        // Cut into the declared content bytes
        let cut = HEADER_LEN + msg.sender_name.len() + 2;
        assert_eq!(decode(&bytes[..cut]).unwrap_err(), WireError::Truncated);
    }

    #[test]
    fn test_invalid_message_type() {
        let msg = sample();
        let mut bytes = encode(&msg).unwrap().to_vec();
        bytes[16] = 0xFF;
        bytes[17] = 0xFF;
        assert_eq!(
            decode(&bytes).unwrap_err(),
            WireError::InvalidMessageType(0xFFFF)
        );
    }

    #[test]
    fn test_garbled_route_path() {
        let msg = sample();
        let mut bytes = encode(&msg).unwrap().to_vec();
        let len = bytes.len();
        bytes[len - 1] = b'!';
        assert_eq!(decode(&bytes).unwrap_err(), WireError::Malformed);
    }

    #[test]
    fn test_name_length_limit() {
        let mut msg = sample();
        msg.sender_name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            encode(&msg).unwrap_err(),
            WireError::NameTooLong(_)
        ));

        msg.sender_name = "x".repeat(MAX_NAME_LEN);
        assert!(encode(&msg).is_ok());
    }

    #[test]
    fn test_sequence_survives_beyond_one_byte() {
        // The sequence field is four bytes wide on the wire; values past 255
        // must round-trip without truncation.
        let mut msg = sample();
        msg.sequence = 70_000;
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.sequence, 70_000);
    }
}
