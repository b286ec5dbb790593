//! Deserialize values from the publish stream wire format.
use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::take,
    number::complete::{be_i8, be_i32, be_i64, be_u16},
};
use nombytes::NomBytes;

use crate::types::{Partition, Topic};

/// Convert bytes to a validated UTF-8 string.
/// Returns an error if the bytes are not valid UTF-8.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String, nom::Err<nom::error::Error<NomBytes>>> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(
                NomBytes::new(bytes.clone()),
                nom::error::ErrorKind::Verify,
            ))
        })
}

pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u16(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_utf8(s: NomBytes) -> IResult<NomBytes, String> {
    let (s, raw) = parse_string(s)?;
    Ok((s, bytes_to_string(&raw)?))
}

pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i32(s)?;
    if length < 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (s, data) = take(length as usize)(s)?;
    Ok((s, data.into_bytes()))
}

pub fn parse_bool(s: NomBytes) -> IResult<NomBytes, bool> {
    let (s, value) = be_i8(s)?;
    Ok((s, value != 0))
}

pub fn parse_topic(s: NomBytes) -> IResult<NomBytes, Topic> {
    let (s, namespace) = parse_utf8(s)?;
    let (s, name) = parse_utf8(s)?;
    Ok((s, Topic::new(namespace, name)))
}

pub fn parse_partition(s: NomBytes) -> IResult<NomBytes, Partition> {
    let (s, ring_size) = be_i32(s)?;
    let (s, range_start) = be_i32(s)?;
    let (s, range_stop) = be_i32(s)?;
    let (s, unix_time_ns) = be_i64(s)?;
    Ok((
        s,
        Partition::new(ring_size, range_start, range_stop, unix_time_ns),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string() {
        let input = NomBytes::new(Bytes::copy_from_slice(&[0x00, 0x03, b'a', b'b', b'c', 0xFF][..]));
        let (rest, s) = parse_string(input).unwrap();
        assert_eq!(s.as_ref(), b"abc");
        assert_eq!(rest.into_bytes().as_ref(), &[0xFF]);
    }

    #[test]
    fn test_parse_utf8_rejects_invalid() {
        let input = NomBytes::new(Bytes::copy_from_slice(&[0x00, 0x02, 0xC3, 0x28][..]));
        assert!(parse_utf8(input).is_err());
    }

    #[test]
    fn test_parse_bytes_negative_length() {
        let input = NomBytes::new(Bytes::copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFE][..]));
        assert!(matches!(parse_bytes(input), Err(nom::Err::Failure(_))));
    }

    #[test]
    fn test_parse_bytes_truncated() {
        let input = NomBytes::new(Bytes::copy_from_slice(&[0x00, 0x00, 0x00, 0x05, 1, 2][..]));
        assert!(parse_bytes(input).is_err());
    }

    #[test]
    fn test_parse_topic_and_partition() {
        let mut buf = vec![0x00, 0x01, b'n', 0x00, 0x02, b'o', b'k'];
        buf.extend_from_slice(&1024i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&512i32.to_be_bytes());
        buf.extend_from_slice(&77i64.to_be_bytes());

        let (rest, topic) = parse_topic(NomBytes::new(Bytes::copy_from_slice(&buf[..]))).unwrap();
        assert_eq!(topic, Topic::new("n", "ok"));
        let (rest, partition) = parse_partition(rest).unwrap();
        assert_eq!(partition, Partition::new(1024, 0, 512, 77));
        assert!(rest.into_bytes().is_empty());
    }
}
