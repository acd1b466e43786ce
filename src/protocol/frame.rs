//! §6 Wire protocol — `[u8 type][u32 length, network-order][payload]`.
//! Type codes: `Q` text SQL, `J` JSON, `B` binary tagged stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, Result};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Query,
    Json,
    Binary,
}

impl FrameKind {
    fn tag(self) -> u8 {
        match self {
            FrameKind::Query => b'Q',
            FrameKind::Json => b'J',
            FrameKind::Binary => b'B',
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            b'Q' => FrameKind::Query,
            b'J' => FrameKind::Json,
            b'B' => FrameKind::Binary,
            other => {
                return Err(EngineError::Parse(format!(
                    "unknown frame type byte {other:#x}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Query,
            payload: sql.into().into_bytes(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Json,
            payload: body.into().into_bytes(),
        }
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub async fn write_to(&self, out: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        out.write_u8(self.kind.tag()).await?;
        out.write_u32(self.payload.len() as u32).await?;
        out.write_all(&self.payload).await?;
        out.flush().await?;
        Ok(())
    }

    pub async fn read_from(input: &mut (impl AsyncRead + Unpin)) -> Result<Self> {
        let tag = input.read_u8().await?;
        let kind = FrameKind::from_tag(tag)?;
        let len = input.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(EngineError::Parse(format!("frame of {len} bytes exceeds the cap")));
        }
        let mut payload = vec![0u8; len as usize];
        input.read_exact(&mut payload).await?;
        Ok(Self { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_pipe() {
        let frame = Frame::query("SELECT 1");
        let mut buf = Vec::new();
        frame.write_to(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(read_back.kind, FrameKind::Query);
        assert_eq!(read_back.text(), "SELECT 1");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.push(b'Q');
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(Frame::read_from(&mut cursor).await.is_err());
    }
}
