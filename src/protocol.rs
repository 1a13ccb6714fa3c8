//! Tuya LAN wire framing: envelope layout, CRC, and the version-specific
//! packet shape rules (extended header placement, response status-code
//! heuristic).
//!
//! Packet shape (all integers big-endian):
//! `prefix(4) seq(4) cmd(4) length(4) [extHeader(15)] body crc32(4) suffix(4)`

use crate::crypto;
use crc::{CRC_32_ISO_HDLC, Crc};
use std::fmt;

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;

/// Command codes used by this crate. Tuya defines many more (session key
/// negotiation, heartbeat, gateway sub-device management, ...); only the
/// four needed for on/off sense-and-control are named here.
pub const CONTROL: u32 = 7;
pub const STATUS: u32 = 8;
pub const QUERY: u32 = 10;
pub const UPDATE: u32 = 18;

/// Protocol version of a device's local key. Only 3.1 and 3.3 are
/// implemented; 3.4 is recorded as data (so configuration can name it and
/// reject it cleanly) but the codec does not speak it — it requires an
/// HMAC-authenticated GCM frame this crate does not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V3_1,
    V3_3,
    V3_4,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V3_1 => "3.1",
            Version::V3_3 => "3.3",
            Version::V3_4 => "3.4",
        }
    }

    /// Whether the codec in this crate can actually speak this version.
    pub fn supported(&self) -> bool {
        matches!(self, Version::V3_1 | Version::V3_3)
    }

    /// The 15-byte, zero-padded ASCII version string used as the extended
    /// header in outgoing command frames.
    fn ext_header(&self) -> [u8; 15] {
        let mut buf = [0u8; 15];
        let s = self.as_str().as_bytes();
        buf[..s.len()].copy_from_slice(s);
        buf
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::V3_3
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Version {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3.1" => Ok(Version::V3_1),
            "3.3" => Ok(Version::V3_3),
            "3.4" => Ok(Version::V3_4),
            _ => Err(()),
        }
    }
}

/// The `(id, localKey, protocolVersion)` triple needed to talk to one device.
#[derive(Debug, Clone)]
pub struct Secret {
    pub id: String,
    pub local_key: [u8; 16],
    pub version: Version,
}

impl Secret {
    pub fn new(id: impl Into<String>, local_key_str: &str, version: Version) -> Self {
        Self {
            id: id.into(),
            local_key: crypto::device_key(local_key_str.as_bytes()),
            version,
        }
    }
}

/// Whether an outgoing command carries the 15-byte extended header. QUERY
/// and UPDATE omit it; everything else (in practice, just CONTROL) includes
/// it.
fn wants_ext_header(code: u32) -> bool {
    code != QUERY && code != UPDATE
}

/// Encode a command frame into `buf`. Returns the total framed length, or
/// `0` if the ciphertext plus envelope would overflow `buf`.
///
/// The extended header (when present) is written in the clear, between the
/// length field and the encrypted body — it is not covered by encryption,
/// only by the CRC.
pub fn encode(buf: &mut [u8], secret: &Secret, code: u32, seqno: u32, json: &[u8]) -> usize {
    let ciphertext = crypto::encrypt(&secret.local_key, json);
    let ext_len = if wants_ext_header(code) { 15 } else { 0 };
    let total_len = 16 + ext_len + ciphertext.len() + 8;
    if total_len > buf.len() {
        return 0;
    }

    buf[0..4].copy_from_slice(&PREFIX.to_be_bytes());
    buf[4..8].copy_from_slice(&seqno.to_be_bytes());
    buf[8..12].copy_from_slice(&code.to_be_bytes());
    let length = (ext_len + ciphertext.len() + 8) as u32;
    buf[12..16].copy_from_slice(&length.to_be_bytes());

    let mut offset = 16;
    if ext_len > 0 {
        buf[offset..offset + 15].copy_from_slice(&secret.version.ext_header());
        offset += 15;
    }
    buf[offset..offset + ciphertext.len()].copy_from_slice(&ciphertext);
    offset += ciphertext.len();

    let crc = crc32(&buf[..offset]);
    buf[offset..offset + 4].copy_from_slice(&crc.to_be_bytes());
    offset += 4;
    buf[offset..offset + 4].copy_from_slice(&SUFFIX.to_be_bytes());
    offset += 4;

    offset
}

/// Convenience wrapper over [`encode`] that allocates its own buffer, for
/// callers that do not need the fixed-buffer contract.
pub fn encode_to_vec(secret: &Secret, code: u32, seqno: u32, json: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; json.len() + 16 + 15 + 16 + 8];
    let n = encode(&mut buf, secret, code, seqno, json);
    buf.truncate(n);
    buf
}

fn crc32(data: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    crc.checksum(data)
}

/// Decode one frame. Never errors: malformed input (bad prefix/suffix,
/// truncated, undecryptable) simply yields an empty `plaintext` so callers
/// can drop the frame and keep the connection open, per the codec's
/// lenient-by-design error policy. CRC is computed on encode but is *not*
/// verified here — the transport already checksums the bytes.
///
/// `secret` is `None` for the plaintext v3.1 discovery port, in which case
/// the body is returned verbatim with no decryption attempted.
pub fn decode(raw: &[u8], secret: Option<&Secret>) -> (u32, u32, Vec<u8>) {
    if raw.len() < 16 {
        return (0, 0, Vec::new());
    }
    let prefix = u32::from_be_bytes(raw[0..4].try_into().unwrap());
    if prefix != PREFIX {
        return (0, 0, Vec::new());
    }
    let seqno = u32::from_be_bytes(raw[4..8].try_into().unwrap());
    let cmd = u32::from_be_bytes(raw[8..12].try_into().unwrap());
    let length = u32::from_be_bytes(raw[12..16].try_into().unwrap()) as usize;
    let total = 16 + length;
    if raw.len() < total || length < 8 {
        return (cmd, seqno, Vec::new());
    }
    let suffix = u32::from_be_bytes(raw[total - 4..total].try_into().unwrap());
    if suffix != SUFFIX {
        return (cmd, seqno, Vec::new());
    }

    let body_all = &raw[16..total - 8];
    let plaintext = decode_body(body_all, secret).unwrap_or_default();
    (cmd, seqno, plaintext)
}

/// Try both interpretations of the optional leading 4-byte status code, and
/// both interpretations of the optional 15-byte version header, keeping
/// whichever combination decrypts (or, for plaintext frames, simply
/// parses) to valid JSON. This is more robust than trusting either
/// heuristic alone, per the protocol's documented fragility.
fn decode_body(body_all: &[u8], secret: Option<&Secret>) -> Option<Vec<u8>> {
    let retcode_heuristic_says_present = body_all.len() >= 4 && {
        let val = u32::from_be_bytes(body_all[0..4].try_into().unwrap());
        val & 0xFFFF_FF00 == 0
    };

    let mut candidates: Vec<&[u8]> = Vec::new();
    if retcode_heuristic_says_present {
        candidates.push(&body_all[4..]);
    }
    candidates.push(body_all);
    candidates.dedup();

    for candidate in candidates {
        let outcome = match secret {
            Some(secret) => crypto::decrypt(&secret.local_key, candidate)
                .ok()
                .and_then(|plain| strip_version_header_if_json(plain, secret.version)),
            None => strip_version_header_if_json(candidate.to_vec(), Version::V3_1),
        };
        if outcome.is_some() {
            return outcome;
        }
    }
    None
}

/// If `body` already parses as JSON, use it as-is. Otherwise, if its first
/// bytes look like the device's ASCII version string, skip the 15-byte
/// extended header and retry. Returns `None` if neither interpretation
/// parses as JSON.
fn strip_version_header_if_json(body: Vec<u8>, version: Version) -> Option<Vec<u8>> {
    if body.is_empty() || serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
        return Some(body);
    }
    if body.len() >= 15 {
        let v = version.as_str().as_bytes();
        if &body[..v.len()] == v {
            let rest = body[15..].to_vec();
            if rest.is_empty() || serde_json::from_slice::<serde_json::Value>(&rest).is_ok() {
                return Some(rest);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        Secret::new("device1", "0123456789abcdef", Version::V3_3)
    }

    #[test]
    fn roundtrip_preserves_code_seq_and_payload() {
        let s = secret();
        for len in [1usize, 16, 31, 128, 900] {
            let payload = vec![b'a'; len];
            let framed = encode_to_vec(&s, CONTROL, 42, &payload);
            let (code, seq, plaintext) = decode(&framed, Some(&s));
            assert_eq!(code, CONTROL);
            assert_eq!(seq, 42);
            assert_eq!(plaintext, payload, "len={len}");
        }
    }

    #[test]
    fn control_frames_carry_extended_header_query_frames_do_not() {
        let s = secret();
        let control = encode_to_vec(&s, CONTROL, 1, b"{}");
        assert_eq!(&control[16..19], b"3.3");

        let query = encode_to_vec(&s, QUERY, 1, b"{}");
        // A QUERY frame's bytes right after the length field are ciphertext,
        // not the ASCII version string.
        assert_ne!(&query[16..19], b"3.3");
    }

    #[test]
    fn crc_matches_independent_ieee_802_3_implementation() {
        let s = secret();
        let framed = encode_to_vec(&s, QUERY, 7, b"{}");
        let crc_offset = framed.len() - 8;
        let expected = crc32(&framed[..crc_offset]);
        let actual = u32::from_be_bytes(framed[crc_offset..crc_offset + 4].try_into().unwrap());
        assert_eq!(actual, expected);
    }

    #[test]
    fn decode_rejects_altered_prefix() {
        let s = secret();
        let mut framed = encode_to_vec(&s, QUERY, 1, b"{}");
        framed[0] ^= 0xFF;
        let (_, _, plaintext) = decode(&framed, Some(&s));
        assert!(plaintext.is_empty());
    }

    #[test]
    fn decode_rejects_altered_suffix() {
        let s = secret();
        let mut framed = encode_to_vec(&s, QUERY, 1, b"{}");
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        let (_, _, plaintext) = decode(&framed, Some(&s));
        assert!(plaintext.is_empty());
    }

    #[test]
    fn decode_rejects_length_off_by_one() {
        let s = secret();
        let framed = encode_to_vec(&s, QUERY, 1, b"{}");

        let mut too_short = framed.clone();
        let len_minus_one = u32::from_be_bytes(too_short[12..16].try_into().unwrap()) - 1;
        too_short[12..16].copy_from_slice(&len_minus_one.to_be_bytes());
        let (_, _, plaintext) = decode(&too_short, Some(&s));
        assert!(plaintext.is_empty());

        let mut too_long = framed;
        let len_plus_one = u32::from_be_bytes(too_long[12..16].try_into().unwrap()) + 1;
        too_long[12..16].copy_from_slice(&len_plus_one.to_be_bytes());
        let (_, _, plaintext) = decode(&too_long, Some(&s));
        assert!(plaintext.is_empty());
    }

    #[test]
    fn encode_reports_overflow_as_zero_length() {
        let s = secret();
        let mut tiny = [0u8; 4];
        assert_eq!(encode(&mut tiny, &s, CONTROL, 1, b"{}"), 0);
    }

    #[test]
    fn decode_with_no_secret_returns_body_verbatim() {
        // v3.1 discovery: no encryption at all.
        let mut buf = Vec::new();
        buf.extend_from_slice(&PREFIX.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&QUERY.to_be_bytes());
        let json = br#"{"gwId":"abc123"}"#;
        let length = (json.len() + 8) as u32;
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(json);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&SUFFIX.to_be_bytes());

        let (_, _, plaintext) = decode(&buf, None);
        assert_eq!(plaintext, json);
    }
}
