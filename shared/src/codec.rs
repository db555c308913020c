//! Length-prefixed text framing used by every send and receive on the wire.
//!
//! A frame is the literal tag `BEGIN `, a five digit zero-padded decimal
//! length, a single space, the payload and a trailing `\n`. The length counts
//! the payload plus that trailing separator, so `"OK"` travels as
//! `BEGIN 00003 OK\n`. Older peers depend on this exact layout.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Literal tag opening every frame
pub const FRAME_TAG: &[u8; 6] = b"BEGIN ";
/// Five digits plus the separating space
pub const LENGTH_FIELD_SIZE: usize = 6;
/// Largest value a five digit length field can carry
pub const MAX_FRAME_LENGTH: usize = 99_999;

/// Errors produced while encoding or decoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The six bytes at the start of a frame were not `BEGIN `
    #[error("frame tag mismatch, stream out of sync (read {0:?})")]
    Desync(String),
    /// Length field was not a positive decimal number
    #[error("invalid frame length field {0:?}")]
    InvalidLength(String),
    #[error("payload of {0} bytes does not fit a five digit length field")]
    PayloadTooLarge(usize),
    #[error("frame payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the connection may be kept after this error.
    ///
    /// A bad length field or bad text drops one frame only. A tag mismatch
    /// leaves nothing to parse against, and transport errors end the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::InvalidLength(_) | FrameError::Utf8(_))
    }
}

/// Builds the wire form of a single payload.
pub fn encode(payload: &str) -> Result<Vec<u8>, FrameError> {
    let length = payload.len() + 1;
    if length > MAX_FRAME_LENGTH {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_TAG.len() + LENGTH_FIELD_SIZE + length);
    frame.extend_from_slice(FRAME_TAG);
    frame.extend_from_slice(format!("{:05} ", length).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    frame.push(b'\n');

    Ok(frame)
}

/// Parses the six byte length field (digits plus separator).
pub fn parse_length(field: &[u8]) -> Result<usize, FrameError> {
    let text = String::from_utf8_lossy(field);
    match text.trim().parse::<usize>() {
        Ok(length) if length > 0 && length <= MAX_FRAME_LENGTH => Ok(length),
        _ => Err(FrameError::InvalidLength(text.into_owned())),
    }
}

/// Reads exactly one frame.
///
/// Returns `Ok(None)` when the peer closed the stream before a new frame
/// started, which callers treat as a disconnection.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; FRAME_TAG.len()];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    if &tag != FRAME_TAG {
        return Err(FrameError::Desync(
            String::from_utf8_lossy(&tag).into_owned(),
        ));
    }

    let mut field = [0u8; LENGTH_FIELD_SIZE];
    reader.read_exact(&mut field).await?;
    let length = parse_length(&field)?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    if body.last() == Some(&b'\n') {
        body.pop();
    }

    Ok(Some(String::from_utf8(body)?))
}

/// Encodes `payload` and writes the whole frame.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(payload)?;
    writer.write_all(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;
    use tokio_test::io::Builder;

    #[test]
    fn test_encode_layout() {
        let frame = encode("OK").unwrap();
        assert_eq!(frame, b"BEGIN 00003 OK\n");
    }

    #[test]
    fn test_encode_length_counts_separator() {
        let frame = encode("MOVP alice 2").unwrap();
        assert_eq!(&frame[6..12], b"00013 ");
        assert_eq!(frame.len(), 12 + 13);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode("").unwrap();
        assert_eq!(frame, b"BEGIN 00001 \n");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = "x".repeat(MAX_FRAME_LENGTH);
        assert!(matches!(
            encode(&payload),
            Err(FrameError::PayloadTooLarge(n)) if n == MAX_FRAME_LENGTH
        ));

        let payload = "x".repeat(MAX_FRAME_LENGTH - 1);
        assert!(encode(&payload).is_ok());
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(b"00013 ").unwrap(), 13);
        assert_eq!(parse_length(b"   42 ").unwrap(), 42);
        assert!(matches!(
            parse_length(b"00x13 "),
            Err(FrameError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_length(b"00000 "),
            Err(FrameError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_length(b"-0001 "),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_roundtrip_over_byte_slice() {
        let payloads = ["JOIN alice", "", "NEWP bob 50 1 3 4\nNEWF 0 2 2", "héllo wörld"];

        for payload in payloads {
            let bytes = encode(payload).unwrap();
            let mut reader = &bytes[..];
            let decoded = block_on(read_frame(&mut reader)).unwrap();
            assert_eq!(decoded.as_deref(), Some(payload));
        }
    }

    #[test]
    fn test_read_frame_split_across_reads() {
        let mut stream = Builder::new()
            .read(b"BEG")
            .read(b"IN 000")
            .read(b"06 hel")
            .read(b"lo\n")
            .build();

        let frame = block_on(read_frame(&mut stream)).unwrap();
        assert_eq!(frame.as_deref(), Some("hello"));
    }

    #[test]
    fn test_read_consecutive_frames() {
        let mut bytes = encode("DROP").unwrap();
        bytes.extend(encode("QUIT").unwrap());
        let mut reader = &bytes[..];

        assert_eq!(
            block_on(read_frame(&mut reader)).unwrap().as_deref(),
            Some("DROP")
        );
        assert_eq!(
            block_on(read_frame(&mut reader)).unwrap().as_deref(),
            Some("QUIT")
        );
        assert_eq!(block_on(read_frame(&mut reader)).unwrap(), None);
    }

    #[test]
    fn test_read_frame_end_of_stream() {
        let mut stream = Builder::new().build();
        assert!(block_on(read_frame(&mut stream)).unwrap().is_none());
    }

    #[test]
    fn test_read_frame_bad_tag_is_desync() {
        let mut stream = Builder::new().read(b"HELLO ").build();
        let err = block_on(read_frame(&mut stream)).unwrap_err();
        assert!(matches!(err, FrameError::Desync(ref t) if t == "HELLO "));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_read_frame_non_numeric_length_is_recoverable() {
        let mut stream = Builder::new().read(b"BEGIN 0a012 ").build();
        let err = block_on(read_frame(&mut stream)).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_read_frame_truncated_payload_is_transport_error() {
        let mut stream = Builder::new().read(b"BEGIN 00010 abc").build();
        let err = block_on(read_frame(&mut stream)).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_write_frame() {
        let mut stream = Builder::new().write(b"BEGIN 00005 DROP\n").build();
        block_on(write_frame(&mut stream, "DROP")).unwrap();
    }
}
