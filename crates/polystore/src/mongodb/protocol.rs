//! MongoDB wire protocol framing (OP_MSG)

use bytes::{BufMut, BytesMut};

use polystore_common::{BackendError, Result};

use super::types::{MsgFlags, MsgHeader, OpCode, SectionKind, HEADER_LEN};
use super::SERVICE;

fn protocol_error(message: impl Into<String>) -> BackendError {
    BackendError::protocol(SERVICE, message)
}

fn read_i32(data: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parse MongoDB message header
pub fn parse_header(data: &[u8]) -> Result<MsgHeader> {
    if data.len() < HEADER_LEN {
        return Err(protocol_error("Header too short").into());
    }
    let message_length = read_i32(data, 0);
    if usize::try_from(message_length).map_or(true, |len| len < HEADER_LEN) {
        return Err(protocol_error(format!("Invalid message length {message_length}")).into());
    }
    Ok(MsgHeader {
        message_length,
        request_id: read_i32(data, 4),
        response_to: read_i32(data, 8),
        op_code: u32::from_le_bytes([data[12], data[13], data[14], data[15]]).into(),
    })
}

/// Serialize MongoDB message header
pub fn serialize_header(header: &MsgHeader, buf: &mut BytesMut) {
    buf.put_i32_le(header.message_length);
    buf.put_i32_le(header.request_id);
    buf.put_i32_le(header.response_to);
    buf.put_u32_le(header.op_code as u32);
}

/// Frame `doc` as a complete OP_MSG with a single body section
pub fn serialize_op_msg(request_id: i32, response_to: i32, doc: &bson::Document) -> Result<BytesMut> {
    let mut body = Vec::new();
    doc.to_writer(&mut body)
        .map_err(|e| protocol_error(format!("Failed to serialize BSON: {e}")))?;

    // header + flags + section kind + body
    let message_length = i32::try_from(HEADER_LEN + 4 + 1 + body.len())
        .map_err(|_| protocol_error("Message too large"))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 5 + body.len());
    serialize_header(
        &MsgHeader {
            message_length,
            request_id,
            response_to,
            op_code: OpCode::OpMsg,
        },
        &mut buf,
    );
    buf.put_u32_le(0);
    buf.put_u8(SectionKind::Body as u8);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse the body document of an OP_MSG (`data` excludes the header).
///
/// Document sequence sections are skipped; replies carry everything in the
/// body section.
pub fn parse_op_msg(data: &[u8]) -> Result<bson::Document> {
    if data.len() < 5 {
        return Err(protocol_error("OP_MSG too short").into());
    }
    let flags = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let end = if flags & MsgFlags::CHECKSUM_PRESENT != 0 {
        data.len()
            .checked_sub(4)
            .ok_or_else(|| protocol_error("OP_MSG too short for checksum"))?
    } else {
        data.len()
    };

    let mut at = 4;
    let mut body = None;
    while at < end {
        let kind = data[at];
        at += 1;
        if at + 4 > end {
            return Err(protocol_error("Truncated OP_MSG section").into());
        }
        let size = usize::try_from(read_i32(data, at))
            .map_err(|_| protocol_error("Negative section size"))?;
        if size < 4 || at + size > end {
            return Err(protocol_error("Truncated OP_MSG section").into());
        }
        if kind == SectionKind::Body as u8 {
            let document = bson::Document::from_reader(&mut std::io::Cursor::new(&data[at..at + size]))
                .map_err(|e| protocol_error(e.to_string()))?;
            body = Some(document);
        } else if kind != SectionKind::DocumentSequence as u8 {
            return Err(protocol_error(format!("Unsupported section kind: {kind}")).into());
        }
        at += size;
    }
    body.ok_or_else(|| protocol_error("OP_MSG without a body section").into())
}
