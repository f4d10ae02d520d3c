// SPDX-License-Identifier: Apache-2.0

//! MySQL client packet helpers.
//!
//! A client packet is a 4 byte header (3 byte little-endian payload length and
//! a sequence id) followed by the payload. Statement packets carry a command
//! byte followed by the raw SQL text.

/// Length of the packet header
pub const HEADER_LEN: usize = 4;

/// Text protocol query
pub const COM_QUERY: u8 = 0x03;

/// Prepared statement preparation
pub const COM_STMT_PREPARE: u8 = 0x16;

/// Extracts SQL text from raw request buffers.
///
/// Implementations decide which buffers carry SQL at all; anything else is
/// forwarded by the filters without inspection.
pub trait SqlExtractor: Send + Sync {
    /// Returns true if the buffer carries a SQL statement
    fn is_sql(&self, packet: &[u8]) -> bool;

    /// Returns the decoded SQL text, or `None` for non-statement buffers
    fn extract_sql(&self, packet: &[u8]) -> Option<String>;
}

/// Extractor for the MySQL client protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlExtractor;

impl MySqlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl SqlExtractor for MySqlExtractor {
    fn is_sql(&self, packet: &[u8]) -> bool {
        is_sql(packet)
    }

    fn extract_sql(&self, packet: &[u8]) -> Option<String> {
        extract_sql(packet)
    }
}

/// Declared payload length from the packet header
pub fn payload_len(packet: &[u8]) -> Option<usize> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    Some(packet[0] as usize | (packet[1] as usize) << 8 | (packet[2] as usize) << 16)
}

/// Command byte of a client packet
pub fn command(packet: &[u8]) -> Option<u8> {
    packet.get(HEADER_LEN).copied()
}

/// Returns true for `COM_QUERY` and `COM_STMT_PREPARE` packets
pub fn is_sql(packet: &[u8]) -> bool {
    matches!(command(packet), Some(COM_QUERY) | Some(COM_STMT_PREPARE))
}

/// Extracts the statement text of a SQL packet.
///
/// The text ends at the declared payload length or at the end of the buffer,
/// whichever comes first. Invalid UTF-8 is replaced rather than rejected.
pub fn extract_sql(packet: &[u8]) -> Option<String> {
    if !is_sql(packet) {
        return None;
    }

    let declared = payload_len(packet)?;
    let end = (HEADER_LEN + declared).min(packet.len());
    let start = HEADER_LEN + 1;
    if end < start {
        return Some(String::new());
    }

    Some(String::from_utf8_lossy(&packet[start..end]).into_owned())
}

/// Frames a command packet with the given sequence id
pub fn encode_command(sequence: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() + 1;
    let mut packet = Vec::with_capacity(HEADER_LEN + len);
    packet.push((len & 0xff) as u8);
    packet.push(((len >> 8) & 0xff) as u8);
    packet.push(((len >> 16) & 0xff) as u8);
    packet.push(sequence);
    packet.push(command);
    packet.extend_from_slice(body);
    packet
}

/// Frames a `COM_QUERY` packet for the given SQL text
pub fn encode_query(sql: &str) -> Vec<u8> {
    encode_command(0, COM_QUERY, sql.as_bytes())
}
