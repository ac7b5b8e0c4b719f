//! Worker report frames: `[tag u32 LE][len u32 LE][payload]`.

use std::fmt;
use std::io;

use rocbridge_contracts::{FRAME_TAG_OK, FRAME_TAG_PANIC};

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Result content of a completed call.
    Ok(&'a [u8]),
    /// Panic message text.
    Panic(&'a [u8]),
}

impl Frame<'_> {
    pub fn tag(&self) -> u32 {
        match self {
            Frame::Ok(_) => FRAME_TAG_OK,
            Frame::Panic(_) => FRAME_TAG_PANIC,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Ok(payload) | Frame::Panic(payload) => payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Truncated { have: usize, need: usize },
    TooLarge { len: usize, max: usize },
    TrailingBytes { extra: usize },
    UnknownTag(u32),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { have, need } => {
                write!(f, "truncated frame: have {have} bytes, need {need}")
            }
            FrameError::TooLarge { len, max } => {
                write!(f, "frame payload of {len} bytes exceeds the {max} byte limit")
            }
            FrameError::TrailingBytes { extra } => {
                write!(f, "{extra} unexpected bytes after the frame")
            }
            FrameError::UnknownTag(tag) => write!(f, "unknown frame tag {tag}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encodes one frame. Payloads longer than `u32::MAX` are clamped in the header, which
/// the decoder then reports as truncated.
pub fn encode(frame: Frame<'_>) -> Vec<u8> {
    let payload = frame.payload();
    let len: u32 = payload.len().try_into().unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&frame.tag().to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes exactly one frame occupying all of `buf`.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Frame<'_>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            have: buf.len(),
            need: HEADER_LEN,
        });
    }
    let tag = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let len_u32 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let len = usize::try_from(len_u32).unwrap_or(usize::MAX);
    if len > max_payload {
        return Err(FrameError::TooLarge {
            len,
            max: max_payload,
        });
    }

    let body = &buf[HEADER_LEN..];
    if body.len() < len {
        return Err(FrameError::Truncated {
            have: buf.len(),
            need: HEADER_LEN + len,
        });
    }
    if body.len() > len {
        return Err(FrameError::TrailingBytes {
            extra: body.len() - len,
        });
    }

    match tag {
        FRAME_TAG_OK => Ok(Frame::Ok(body)),
        FRAME_TAG_PANIC => Ok(Frame::Panic(body)),
        other => Err(FrameError::UnknownTag(other)),
    }
}

/// Writes all of `bytes` to a raw descriptor, retrying on `EINTR`. Only uses `write(2)`,
/// so it is safe to call from a forked child.
#[cfg(unix)]
pub(crate) fn write_all_fd(fd: libc::c_int, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }
        bytes = &bytes[n as usize..];
    }
    Ok(())
}
