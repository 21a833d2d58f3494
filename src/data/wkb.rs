//! MySQL internal geometry → PostgreSQL point literal
//!
//! MySQL stores geometry values as a 4-byte SRID followed by standard WKB:
//!
//! ```text
//! [0..4)   SRID (discarded)
//! [4]      byte order (1 = little endian, 0 = big endian)
//! [5..9)   geometry type (discarded)
//! [9..17)  X as IEEE-754 double
//! [17..25) Y as IEEE-754 double
//! ```
//!
//! Only the leading point is read. Anything too short to hold it decodes to `None`.

/// Smallest buffer accepted at all
pub const MIN_WKB_LEN: usize = 21;

/// Decode a geometry value to a `"(x, y)"` point literal
///
/// Returns `None` for undersized or otherwise unreadable input; never panics.
///
/// # Examples
///
/// ```
/// use lifeport::data::wkb::decode_point;
///
/// assert_eq!(decode_point(&[0u8; 4]), None);
/// ```
pub fn decode_point(bytes: &[u8]) -> Option<String> {
    if bytes.len() < MIN_WKB_LEN {
        return None;
    }
    let little_endian = bytes[4] != 0;
    let x = read_f64(bytes.get(9..17)?, little_endian)?;
    let y = read_f64(bytes.get(17..25)?, little_endian)?;
    Some(format!("({}, {})", x, y))
}

fn read_f64(slice: &[u8], little_endian: bool) -> Option<f64> {
    let raw: [u8; 8] = slice.try_into().ok()?;
    Some(if little_endian {
        f64::from_le_bytes(raw)
    } else {
        f64::from_be_bytes(raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(25);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf
    }

    #[test]
    fn test_decode_point() {
        let buf = point(12.5, -3.25);
        assert_eq!(buf.len(), 25);
        assert_eq!(decode_point(&buf), Some("(12.5, -3.25)".to_string()));
    }

    #[test]
    fn test_undersized_is_none() {
        assert_eq!(decode_point(&[]), None);
        assert_eq!(decode_point(&[1u8; 20]), None);
    }

    #[test]
    fn test_truncated_y_is_none() {
        let buf = point(1.0, 2.0);
        assert_eq!(decode_point(&buf[..22]), None);
    }

    #[test]
    fn test_big_endian_flag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0, 0, 0]);
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&(-7.5f64).to_be_bytes());
        buf.extend_from_slice(&(0.25f64).to_be_bytes());
        assert_eq!(decode_point(&buf), Some("(-7.5, 0.25)".to_string()));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut buf = point(3.0, 4.5);
        buf.extend_from_slice(&[9, 9, 9]);
        assert_eq!(decode_point(&buf), Some("(3, 4.5)".to_string()));
    }
}
