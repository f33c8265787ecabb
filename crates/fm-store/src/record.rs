//! Record codec: device state messages and the checksummed on-disk frame.
//!
//! A stored record is `[CRC32_BE(payload) || payload]` where the payload is
//! the length-delimited encoding of [`DevState`]. The checksum occupies
//! exactly four bytes, most-significant byte first. Decoding recomputes the
//! checksum over the payload and rejects the frame on mismatch, which makes
//! a corrupted file unreadable without being fatal for the store.

use crate::error::{FmError, Result};
use prost::Message;

/// Byte length of the checksum prefix.
pub const CRC_LEN: usize = 4;

/// One observed value of one metric.
///
/// `timestamp` is only set for slow metrics whose source observed the value
/// asynchronously from the capture instant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    /// Metric identifier, unique within a record.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Source status code for this observation.
    #[prost(int32, tag = "2")]
    pub status: i32,
    /// Integer value; the real value is `value * 10^scale`.
    #[prost(int32, tag = "3")]
    pub value: i32,
    /// Decimal scale, by convention in `-5..=5` but round-tripped verbatim.
    #[prost(int32, tag = "4")]
    pub scale: i32,
    /// Capture instant of the value, when it differs from the record's.
    #[prost(uint32, optional, tag = "5")]
    pub timestamp: Option<u32>,
}

impl Metric {
    /// Returns the real value `value * 10^scale`.
    pub fn real_value(&self) -> f64 {
        self.value as f64 * 10f64.powi(self.scale)
    }
}

/// A device state: capture wall-clock plus the metrics observed at it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DevState {
    /// Device identifier.
    #[prost(uint32, tag = "1")]
    pub devid: u32,
    /// Wall-clock of the capture, seconds since epoch.
    #[prost(uint32, tag = "2")]
    pub timestamp: u32,
    /// Observed metrics, unique by id.
    #[prost(message, repeated, tag = "3")]
    pub metrics: Vec<Metric>,
}

/// Encodes a device state into the checksummed record frame.
pub fn encode_record(state: &DevState) -> Vec<u8> {
    let payload = state.encode_length_delimited_to_vec();
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(CRC_LEN + payload.len());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Decodes a record frame, verifying its checksum.
///
/// # Errors
///
/// Returns `FmError::InvalidRecord` when the frame is shorter than the
/// checksum prefix, `FmError::ChecksumMismatch` when the payload does not
/// hash to the stored value, and `FmError::Decode` when the payload is not
/// a valid device state.
pub fn decode_record(frame: &[u8]) -> Result<DevState> {
    if frame.len() < CRC_LEN {
        return Err(FmError::InvalidRecord { len: frame.len() });
    }

    let (prefix, payload) = frame.split_at(CRC_LEN);
    let expected = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(FmError::ChecksumMismatch { expected, actual });
    }

    Ok(DevState::decode_length_delimited(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> DevState {
        DevState {
            devid: 7,
            timestamp: 1_700_000_000,
            metrics: vec![
                Metric {
                    id: 1,
                    status: 0,
                    value: 100,
                    scale: 0,
                    timestamp: None,
                },
                Metric {
                    id: 2,
                    status: -3,
                    value: -2750,
                    scale: -2,
                    timestamp: Some(1_699_999_987),
                },
            ],
        }
    }

    #[test]
    fn test_roundtrip() {
        let state = sample_state();
        let frame = encode_record(&state);
        let decoded = decode_record(&frame).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_roundtrip_scale_out_of_convention() {
        let mut state = sample_state();
        state.metrics[0].scale = 9;
        state.metrics[1].scale = -9;
        let decoded = decode_record(&encode_record(&state)).unwrap();
        assert_eq!(decoded.metrics[0].scale, 9);
        assert_eq!(decoded.metrics[1].scale, -9);
    }

    #[test]
    fn test_checksum_rejects_flipped_byte() {
        let mut frame = encode_record(&sample_state());
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(
            decode_record(&frame),
            Err(FmError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_covers_prefix() {
        let mut frame = encode_record(&sample_state());
        frame[0] ^= 0x01;
        assert!(matches!(
            decode_record(&frame),
            Err(FmError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_short_frame() {
        assert!(matches!(
            decode_record(&[0u8; 3]),
            Err(FmError::InvalidRecord { len: 3 })
        ));
    }

    #[test]
    fn test_crc_is_big_endian() {
        let frame = encode_record(&sample_state());
        let crc = crc32fast::hash(&frame[CRC_LEN..]);
        assert_eq!(frame[0], (crc >> 24) as u8);
        assert_eq!(frame[3], (crc & 0xff) as u8);
    }

    #[test]
    fn test_real_value() {
        let metric = Metric {
            id: 1,
            status: 0,
            value: -2750,
            scale: -2,
            timestamp: None,
        };
        assert!((metric.real_value() + 27.5).abs() < f64::EPSILON);
    }
}
