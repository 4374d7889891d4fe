use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::guide::GuideRow;
use crate::model::{ChannelId, Livestream};
use crate::registry::RegistrySnapshot;

/// Bump when the wire format changes incompatibly.  Clients check it in
/// `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body.  A full guide is a few hundred KiB.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Client → daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Select { channel_id: ChannelId },
    Deselect,
    PreferLivestream {
        channel_id: ChannelId,
        livestream: Livestream,
    },
    Reorder { from: usize, to: usize },
    Play,
    Pause,
    RefreshSchedule,
    GetState,
    GetGuide,
}

/// Daemon → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// First frame on every connection.
    Hello {
        protocol_version: u32,
        state: RegistrySnapshot,
    },
    State {
        data: RegistrySnapshot,
    },
    /// Derived channel rows; sent after schedule refreshes, on the periodic
    /// tick and on request.
    Guide {
        channels: Vec<GuideRow>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// Frame as a big-endian u32 length followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            anyhow::bail!("message of {} bytes exceeds the frame size limit", json.len());
        }
        let len = u32::try_from(json.len())?;
        let mut frame = Vec::with_capacity(4 + json.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&json);
        Ok(frame)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.  `Ok(None)` means the frame is not
    /// complete yet.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        let Some(header) = data.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        let Some(body) = data.get(4..4 + len) else {
            return Ok(None);
        };
        let msg: Self =
            serde_json::from_slice(body).map_err(|source| FrameError::Malformed { len, source })?;
        Ok(Some((msg, 4 + len)))
    }
}
