use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::message::Message;

/// Maximum accepted frame payload.
///
/// Frames claiming more than this fail the connection with a decode error
/// instead of allocating the buffer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encodes a message into one frame: 4-byte big-endian payload length
/// followed by the UTF-8 JSON body.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a frame payload (without the length prefix) into a message.
pub fn decode(payload: &[u8]) -> Result<Message> {
    serde_json::from_slice(payload)
        .map_err(|e| RpcError::Decode(format!("malformed message payload: {e}")))
}

/// Writes one framed message. Length and payload go out in a single write
/// so a frame is never interleaved with another writer's bytes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| RpcError::Transport(format!("writing frame: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| RpcError::Transport(format!("flushing frame: {e}")))?;
    Ok(())
}

/// Reads one raw frame payload, waiting until the full payload announced by
/// the length prefix has arrived.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. A frame larger
/// than [`MAX_FRAME_SIZE`] is a decode error and must fail the connection
/// (the stream cannot be resynchronized). A payload that arrives intact but
/// fails JSON decoding leaves the stream positioned at the next frame, so
/// callers may answer with a failure message and keep reading.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RpcError::Transport(format!("reading frame length: {e}"))),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::Decode(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| RpcError::Transport(format!("reading frame payload: {e}")))?;

    Ok(Some(payload))
}

/// Reads one framed message.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        None => Ok(None),
        Some(payload) => decode(&payload).map(Some),
    }
}
