// Frame header shared by the receive and send paths.
//
// Wire layout (big-endian), 16 bytes:
//   0..4   type
//   4..8   body_length
//   8      flag (0 system, 1 application)
//   9..12  reserved, zero
//   12..16 checksum (MAGIC)
//
// Headers stored in queue blocks use the same layout in host byte order.

use super::error::FrameError;

pub const HEADER_LEN: usize = 16;

/// Structural sanity constant, not a digest.
pub const MAGIC: u32 = 0x1FE2_3DC4;

/// Message types must be below this value.
pub const TYPE_MAX: u32 = 0xFF;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFlag {
    System = 0,
    Application = 1,
}

impl TryFrom<u8> for FrameFlag {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(FrameFlag::System),
            1 => Ok(FrameFlag::Application),
            other => Err(FrameError::BadFlag(other)),
        }
    }
}

/// Sub-types of system frames.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemType {
    Unknown = 0,
    KeepaliveRequest = 1,
    KeepaliveReply = 2,
    LinkInfoReport = 3,
}

impl SystemType {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => SystemType::KeepaliveRequest,
            2 => SystemType::KeepaliveReply,
            3 => SystemType::LinkInfoReport,
            _ => SystemType::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u32,
    pub body_len: u32,
    pub flag: FrameFlag,
    pub checksum: u32,
}

enum Order {
    Wire,
    Local,
}

impl FrameHeader {
    /// Header for a frame carrying `body_len` bytes, checksum set
    pub fn new(flag: FrameFlag, msg_type: u32, body_len: u32) -> Self {
        Self {
            msg_type,
            body_len,
            flag,
            checksum: MAGIC,
        }
    }

    pub fn application(msg_type: u32, body_len: u32) -> Self {
        Self::new(FrameFlag::Application, msg_type, body_len)
    }

    pub fn system(kind: SystemType, body_len: u32) -> Self {
        Self::new(FrameFlag::System, kind as u32, body_len)
    }

    pub fn is_system(&self) -> bool {
        self.flag == FrameFlag::System
    }

    /// Header plus body
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_len as usize
    }

    /// Check checksum, type range and body size. Pure: the header is not
    /// modified and the same header always yields the same answer.
    pub fn validate(&self, max_body: usize) -> Result<(), FrameError> {
        if self.checksum != MAGIC {
            return Err(FrameError::BadChecksum {
                found: self.checksum,
            });
        }
        if self.msg_type >= TYPE_MAX {
            return Err(FrameError::TypeOutOfRange {
                msg_type: self.msg_type,
                max: TYPE_MAX,
            });
        }
        if self.body_len as usize > max_body {
            return Err(FrameError::BodyTooLarge {
                len: self.body_len,
                max: max_body.min(u32::MAX as usize) as u32,
            });
        }
        Ok(())
    }

    fn encode(&self, out: &mut [u8], order: Order) -> Result<(), FrameError> {
        if out.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                len: out.len(),
                needed: HEADER_LEN,
            });
        }
        let put = |v: u32| match order {
            Order::Wire => v.to_be_bytes(),
            Order::Local => v.to_ne_bytes(),
        };
        out[0..4].copy_from_slice(&put(self.msg_type));
        out[4..8].copy_from_slice(&put(self.body_len));
        out[8] = self.flag as u8;
        out[9..12].fill(0);
        out[12..16].copy_from_slice(&put(self.checksum));
        Ok(())
    }

    fn decode(bytes: &[u8], order: Order) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }
        let get = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[at..at + 4]);
            match order {
                Order::Wire => u32::from_be_bytes(word),
                Order::Local => u32::from_ne_bytes(word),
            }
        };
        Ok(Self {
            msg_type: get(0),
            body_len: get(4),
            flag: FrameFlag::try_from(bytes[8])?,
            checksum: get(12),
        })
    }

    /// Write the header in network byte order
    pub fn encode_wire(&self, out: &mut [u8]) -> Result<(), FrameError> {
        self.encode(out, Order::Wire)
    }

    /// Read a network-order header. No validation beyond the flag byte.
    pub fn decode_wire(bytes: &[u8]) -> Result<Self, FrameError> {
        Self::decode(bytes, Order::Wire)
    }

    /// Write the header in host byte order, for queue-resident frames
    pub fn encode_local(&self, out: &mut [u8]) -> Result<(), FrameError> {
        self.encode(out, Order::Local)
    }

    pub fn decode_local(bytes: &[u8]) -> Result<Self, FrameError> {
        Self::decode(bytes, Order::Local)
    }
}

/// Rewrite a host-order header at the front of `buf` in network order
pub fn local_to_wire(buf: &mut [u8]) -> Result<FrameHeader, FrameError> {
    let header = FrameHeader::decode_local(buf)?;
    header.encode_wire(buf)?;
    Ok(header)
}

/// Rewrite a network-order header at the front of `buf` in host order
pub fn wire_to_local(buf: &mut [u8]) -> Result<FrameHeader, FrameError> {
    let header = FrameHeader::decode_wire(buf)?;
    header.encode_local(buf)?;
    Ok(header)
}

/// Write a complete host-order frame (header + body) into `buf`
pub fn write_local_frame(
    buf: &mut [u8],
    header: &FrameHeader,
    body: &[u8],
) -> Result<usize, FrameError> {
    let total = HEADER_LEN + body.len();
    if buf.len() < total {
        return Err(FrameError::Truncated {
            len: buf.len(),
            needed: total,
        });
    }
    header.encode_local(buf)?;
    buf[HEADER_LEN..total].copy_from_slice(body);
    Ok(total)
}

/// Body of a `LinkInfoReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub is_primary: bool,
}

impl LinkInfo {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        (self.is_primary as u32).to_be_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let word: [u8; 4] = body
            .get(..Self::LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(FrameError::Truncated {
                len: body.len(),
                needed: Self::LEN,
            })?;
        Ok(Self {
            is_primary: u32::from_be_bytes(word) != 0,
        })
    }
}
