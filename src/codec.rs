//! Wire-level constants and the shared length-prefixed wide-character string
//! encoding used by both [`crate::request::Request`] (writer side) and
//! [`crate::parser::Parser`] (reader side).

/// Bytes reserved at the front of every outbound request buffer for the
/// length/opcode/id header, written in just before the buffer is handed to
/// the socket.
pub const HEADER_SIZE: usize = 12;

/// Largest body (the bytes following the 4-byte length prefix) this client
/// will accept from the peer. Anything larger is treated as a framing
/// violation.
pub const MAX_BODY_LEN: usize = 32768;

/// Event code of the distinguished "connected" unsolicited event.
pub const CONNECTED_EVENT_CODE: u32 = 1034;

/// `GRILIO_STATUS_OK` equivalent: the request succeeded and `status` was
/// passed through from the peer unchanged.
pub const STATUS_OK: i32 = 0;
pub const STATUS_CANCELLED: i32 = -1;
pub const STATUS_TIMEOUT: i32 = -2;

/// Round `n` up to the next multiple of 4.
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Encode a nullable UTF-8 string as the protocol's length-prefixed,
/// NUL-terminated, 4-byte-aligned UTF-16 string and append it to `out`.
///
/// `None` encodes as a bare `-1` length word. `Some("")` encodes as
/// `len=0` followed by one zero wide char and a trailing `0xFFFF` padding
/// word (8 bytes after the length), matching the peer's own encoder.
pub fn append_utf8_string(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        None => out.extend_from_slice(&(-1i32).to_ne_bytes()),
        Some(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let len = units.len() as i32;
            out.extend_from_slice(&len.to_ne_bytes());
            let padded_len = align4((units.len() + 1) * 2);
            let start = out.len();
            out.resize(start + padded_len, 0);
            let dst = &mut out[start..];
            for (i, unit) in units.iter().enumerate() {
                dst[i * 2..i * 2 + 2].copy_from_slice(&unit.to_ne_bytes());
            }
            // NUL terminator at `units.len()` is already zero from `resize`.
            // Any remaining padding bytes up to `padded_len` stay zero,
            // except for the zero-length-string special case below, which
            // needs a trailing 0xFFFF padding word instead of zeros.
            if units.is_empty() {
                debug_assert_eq!(padded_len, 4);
                dst[2..4].copy_from_slice(&0xFFFFu16.to_ne_bytes());
            }
        }
    }
}

/// Read back a string encoded by [`append_utf8_string`] from `body[pos..]`.
/// Returns `(value, bytes_consumed)`, or `None` if the buffer is too short.
pub fn read_utf8_string(body: &[u8], pos: usize) -> Option<(Option<String>, usize)> {
    if pos + 4 > body.len() {
        return None;
    }
    let len = i32::from_ne_bytes(body[pos..pos + 4].try_into().unwrap());
    if len == -1 {
        return Some((None, 4));
    }
    if len < 0 {
        return None;
    }
    let len = len as usize;
    let padded_len = align4((len + 1) * 2);
    if pos + 4 + padded_len > body.len() {
        return None;
    }
    let units_bytes = &body[pos + 4..pos + 4 + len * 2];
    let units: Vec<u16> = units_bytes
        .chunks_exact(2)
        .map(|c| u16::from_ne_bytes([c[0], c[1]]))
        .collect();
    let s = String::from_utf16_lossy(&units);
    Some((Some(s), 4 + padded_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }

    #[test]
    fn round_trip_null_string() {
        let mut buf = Vec::new();
        append_utf8_string(&mut buf, None);
        let (value, consumed) = read_utf8_string(&buf, 0).unwrap();
        assert_eq!(value, None);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn round_trip_empty_string() {
        let mut buf = Vec::new();
        append_utf8_string(&mut buf, Some(""));
        assert_eq!(buf.len(), 8);
        let (value, consumed) = read_utf8_string(&buf, 0).unwrap();
        assert_eq!(value.as_deref(), Some(""));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn round_trip_ascii_string() {
        let mut buf = Vec::new();
        append_utf8_string(&mut buf, Some("UNIT_TEST"));
        let (value, consumed) = read_utf8_string(&buf, 0).unwrap();
        assert_eq!(value.as_deref(), Some("UNIT_TEST"));
        assert_eq!(consumed, buf.len());
        assert_eq!(consumed % 4, 0);
    }

    #[test]
    fn round_trip_non_ascii_string() {
        let mut buf = Vec::new();
        append_utf8_string(&mut buf, Some("héllo→wörld"));
        let (value, consumed) = read_utf8_string(&buf, 0).unwrap();
        assert_eq!(value.as_deref(), Some("héllo→wörld"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn consecutive_strings_stay_aligned() {
        let mut buf = Vec::new();
        append_utf8_string(&mut buf, Some("a"));
        append_utf8_string(&mut buf, Some("bb"));
        let (first, n1) = read_utf8_string(&buf, 0).unwrap();
        let (second, _n2) = read_utf8_string(&buf, n1).unwrap();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("bb"));
    }
}
