//! Length-prefixed JSON framing.
//!
//! Every message is a 4-byte big-endian length followed by a JSON body.
//! Partial reads and writes are resumed by the codec, so message
//! boundaries never depend on how the kernel splits the stream.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::ChannelError;

/// Largest accepted frame body. Larger frames are rejected before any
/// allocation for the body happens.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// A byte stream wrapped in the control channel's framing.
pub type FramedStream<S> = Framed<S, LengthDelimitedCodec>;

/// Wrap a stream in the control channel's framing.
pub fn framed<S>(stream: S) -> FramedStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(stream, codec)
}

/// Serialize `message` into a frame body.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ChannelError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| ChannelError::Protocol(format!("failed to encode message: {e}")))
}

/// Deserialize a frame body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ChannelError> {
    serde_json::from_slice(body)
        .map_err(|e| ChannelError::Protocol(format!("malformed message: {e}")))
}

/// Write one message as a single frame and flush it.
pub async fn write_message<S, T>(
    framed: &mut FramedStream<S>,
    message: &T,
) -> Result<(), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(message)?;
    framed.send(body).await?;
    Ok(())
}

/// Read the next raw frame body. `Ok(None)` means the peer closed the
/// stream cleanly before sending anything.
pub async fn read_frame<S>(framed: &mut FramedStream<S>) -> Result<Option<Bytes>, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        None => Ok(None),
        Some(Ok(body)) => Ok(Some(body.freeze())),
        Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(ChannelError::Protocol(format!("invalid frame: {e}")))
        }
        Some(Err(e)) => Err(ChannelError::Io(e)),
    }
}
