//! HTTP/2 frame layout (RFC 7540 §4, §6).
//!
//! Structural only: frames can be encoded, decoded and their payloads viewed
//! as typed values, but nothing here multiplexes streams, tracks flow-control
//! windows or compresses headers.
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload length the 24-bit field can express.
pub const MAX_FRAME_LEN: u32 = 0x00ff_ffff;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;
const EXCLUSIVE_BIT: u32 = 0x8000_0000;

pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds maximum {1}")]
    Size(usize, u32),
    #[error("{0:?} payload has wrong length {1}")]
    Length(FrameType, usize),
    #[error("pad length exceeds payload")]
    Padding,
    #[error("{0:?} frame requires a stream id")]
    StreamRequired(FrameType),
    #[error("{0:?} frame must be on stream 0")]
    ConnectionOnly(FrameType),
    #[error("invalid value {1} for setting {0:?}")]
    Setting(SettingId, u32),
    #[error("expected {expected:?} frame, found {found:?}")]
    Type { expected: FrameType, found: FrameType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    /// Preserved as read; RFC 7540 §4.1 says to ignore these.
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => *v,
        }
    }

    /// Whether the PADDED flag has a meaning for this type.
    pub fn may_pad(&self) -> bool {
        matches!(
            self,
            FrameType::Data | FrameType::Headers | FrameType::PushPromise
        )
    }
}

/// Error codes carried by RST_STREAM and GOAWAY (RFC 7540 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Other(u32),
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Other(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length, 24 bits.
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    /// 31 bits; the reserved bit is cleared on read and write.
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, length: u32) -> Self {
        Self {
            length,
            frame_type,
            flags,
            stream_id: stream_id & STREAM_ID_MASK,
        }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let length = self.length & MAX_FRAME_LEN;
        buf.put_u8((length >> 16) as u8);
        buf.put_u16(length as u16);
        buf.put_u8(self.frame_type.as_u8());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & STREAM_ID_MASK);
    }

    /// Reads a header from the first nine bytes, `None` if too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..FRAME_HEADER_LEN)?;
        let length = u32::from_be_bytes([0, b[0], b[1], b[2]]);
        let stream_id = u32::from_be_bytes([b[5], b[6], b[7], b[8]]) & STREAM_ID_MASK;
        Some(Self {
            length,
            frame_type: FrameType::from_u8(b[3]),
            flags: b[4],
            stream_id,
        })
    }
}

/// One frame: header plus raw payload, padding included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Fails with [`FrameError::Size`] when the payload does not fit the
    /// 24-bit length field.
    pub fn new(
        frame_type: FrameType,
        flags: u8,
        stream_id: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_FRAME_LEN as usize {
            return Err(FrameError::Size(payload.len(), MAX_FRAME_LEN));
        }
        Ok(Self::sized(frame_type, flags, stream_id, payload))
    }

    // Payload length already known to fit.
    fn sized(frame_type: FrameType, flags: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            header: FrameHeader::new(frame_type, flags, stream_id, payload.len() as u32),
            payload,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_LEN + self.payload.len());
        self.header.encode(buf);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the frame and the bytes consumed, or `None` when the frame
    /// has not fully arrived.
    pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(header) = FrameHeader::decode(buf) else {
            return Ok(None);
        };
        if header.length > max_frame_size {
            return Err(FrameError::Size(header.length as usize, max_frame_size));
        }
        let total = FRAME_HEADER_LEN + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total]);
        Ok(Some((Frame { header, payload }, total)))
    }

    /// Payload with the pad-length byte and trailing padding removed.
    pub fn data(&self) -> Result<Bytes, FrameError> {
        if !(self.header.frame_type.may_pad() && self.header.has(FLAG_PADDED)) {
            return Ok(self.payload.clone());
        }
        let (&pad, rest) = self.payload.split_first().ok_or(FrameError::Padding)?;
        let pad = pad as usize;
        if pad > rest.len() {
            return Err(FrameError::Padding);
        }
        Ok(self.payload.slice(1..1 + rest.len() - pad))
    }

    fn expect(&self, expected: FrameType) -> Result<(), FrameError> {
        if self.frame_type() != expected {
            return Err(FrameError::Type {
                expected,
                found: self.frame_type(),
            });
        }
        Ok(())
    }

    fn exact_len(&self, len: usize) -> Result<&[u8], FrameError> {
        if self.payload.len() != len {
            return Err(FrameError::Length(self.frame_type(), self.payload.len()));
        }
        Ok(&self.payload)
    }

    /// HEADERS: optional priority block and the header block fragment.
    pub fn headers(&self) -> Result<(Option<Priority>, Bytes), FrameError> {
        self.expect(FrameType::Headers)?;
        let data = self.data()?;
        if !self.header.has(FLAG_PRIORITY) {
            return Ok((None, data));
        }
        if data.len() < 5 {
            return Err(FrameError::Length(FrameType::Headers, data.len()));
        }
        Ok((Some(Priority::decode(&data[..5])), data.slice(5..)))
    }

    pub fn priority(&self) -> Result<Priority, FrameError> {
        self.expect(FrameType::Priority)?;
        Ok(Priority::decode(self.exact_len(5)?))
    }

    pub fn rst_stream(&self) -> Result<ErrorCode, FrameError> {
        self.expect(FrameType::RstStream)?;
        let b = self.exact_len(4)?;
        Ok(ErrorCode::from_u32(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn settings(&self) -> Result<Settings, FrameError> {
        self.expect(FrameType::Settings)?;
        if self.stream_id() != 0 {
            return Err(FrameError::ConnectionOnly(FrameType::Settings));
        }
        if self.header.has(FLAG_ACK) {
            self.exact_len(0)?;
            return Ok(Settings::default());
        }
        let mut settings = Settings::default();
        settings.apply(&self.payload)?;
        Ok(settings)
    }

    /// PUSH_PROMISE: promised stream id and header block fragment.
    pub fn push_promise(&self) -> Result<(u32, Bytes), FrameError> {
        self.expect(FrameType::PushPromise)?;
        let data = self.data()?;
        if data.len() < 4 {
            return Err(FrameError::Length(FrameType::PushPromise, data.len()));
        }
        let promised = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & STREAM_ID_MASK;
        Ok((promised, data.slice(4..)))
    }

    pub fn ping(&self) -> Result<[u8; 8], FrameError> {
        self.expect(FrameType::Ping)?;
        let b = self.exact_len(8)?;
        let mut opaque = [0u8; 8];
        opaque.copy_from_slice(b);
        Ok(opaque)
    }

    pub fn goaway(&self) -> Result<GoAway, FrameError> {
        self.expect(FrameType::GoAway)?;
        if self.payload.len() < 8 {
            return Err(FrameError::Length(FrameType::GoAway, self.payload.len()));
        }
        let p = &self.payload;
        Ok(GoAway {
            last_stream_id: u32::from_be_bytes([p[0], p[1], p[2], p[3]]) & STREAM_ID_MASK,
            error_code: ErrorCode::from_u32(u32::from_be_bytes([p[4], p[5], p[6], p[7]])),
            debug_data: self.payload.slice(8..),
        })
    }

    pub fn window_update(&self) -> Result<u32, FrameError> {
        self.expect(FrameType::WindowUpdate)?;
        let b = self.exact_len(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) & STREAM_ID_MASK)
    }

    pub fn settings_frame(settings: &Settings) -> Self {
        Frame::sized(FrameType::Settings, 0, 0, settings.encode())
    }

    pub fn settings_ack() -> Self {
        Frame::sized(FrameType::Settings, FLAG_ACK, 0, Bytes::new())
    }

    pub fn goaway_frame(
        last_stream_id: u32,
        code: ErrorCode,
        debug: &[u8],
    ) -> Result<Self, FrameError> {
        let mut buf = BytesMut::with_capacity(8 + debug.len());
        buf.put_u32(last_stream_id & STREAM_ID_MASK);
        buf.put_u32(code.as_u32());
        buf.put_slice(debug);
        Frame::new(FrameType::GoAway, 0, 0, buf.freeze())
    }

    pub fn rst_stream_frame(stream_id: u32, code: ErrorCode) -> Self {
        Frame::sized(
            FrameType::RstStream,
            0,
            stream_id,
            Bytes::copy_from_slice(&code.as_u32().to_be_bytes()),
        )
    }

    pub fn window_update_frame(stream_id: u32, increment: u32) -> Self {
        Frame::sized(
            FrameType::WindowUpdate,
            0,
            stream_id,
            Bytes::copy_from_slice(&(increment & STREAM_ID_MASK).to_be_bytes()),
        )
    }

    pub fn ping_frame(opaque: [u8; 8], ack: bool) -> Self {
        let flags = if ack { FLAG_ACK } else { 0 };
        Frame::sized(FrameType::Ping, flags, 0, Bytes::copy_from_slice(&opaque))
    }

    /// DATA with optional padding.
    pub fn data_frame(
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        pad: Option<u8>,
    ) -> Result<Self, FrameError> {
        let mut flags = if end_stream { FLAG_END_STREAM } else { 0 };
        let mut buf = BytesMut::with_capacity(data.len() + 256);
        if let Some(pad) = pad {
            flags |= FLAG_PADDED;
            buf.put_u8(pad);
            buf.put_slice(data);
            buf.put_bytes(0, pad as usize);
        } else {
            buf.put_slice(data);
        }
        Frame::new(FrameType::Data, flags, stream_id, buf.freeze())
    }
}

/// Stream dependency carried by PRIORITY and HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    /// Effective weight, 1 to 256. Stored on the wire minus one.
    pub weight: u16,
}

impl Priority {
    fn decode(b: &[u8]) -> Self {
        let raw = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        Self {
            exclusive: raw & EXCLUSIVE_BIT != 0,
            dependency: raw & STREAM_ID_MASK,
            weight: u16::from(b[4]) + 1,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut raw = self.dependency & STREAM_ID_MASK;
        if self.exclusive {
            raw |= EXCLUSIVE_BIT;
        }
        buf.put_u32(raw);
        buf.put_u8(self.weight.clamp(1, 256).saturating_sub(1) as u8);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAway {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    Unknown(u16),
}

impl SettingId {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x1 => SettingId::HeaderTableSize,
            0x2 => SettingId::EnablePush,
            0x3 => SettingId::MaxConcurrentStreams,
            0x4 => SettingId::InitialWindowSize,
            0x5 => SettingId::MaxFrameSize,
            0x6 => SettingId::MaxHeaderListSize,
            other => SettingId::Unknown(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
            SettingId::Unknown(v) => *v,
        }
    }
}

/// SETTINGS table. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Applies a SETTINGS payload of 6-byte (id, value) pairs on top of the
    /// current values. Unknown identifiers are ignored.
    pub fn apply(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() % 6 != 0 {
            return Err(FrameError::Length(FrameType::Settings, payload.len()));
        }
        for pair in payload.chunks_exact(6) {
            let id = SettingId::from_u16(u16::from_be_bytes([pair[0], pair[1]]));
            let value = u32::from_be_bytes([pair[2], pair[3], pair[4], pair[5]]);
            match id {
                SettingId::HeaderTableSize => self.header_table_size = value,
                SettingId::EnablePush => match value {
                    0 => self.enable_push = false,
                    1 => self.enable_push = true,
                    _ => return Err(FrameError::Setting(id, value)),
                },
                SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
                SettingId::InitialWindowSize if value > STREAM_ID_MASK => {
                    return Err(FrameError::Setting(id, value));
                }
                SettingId::InitialWindowSize => self.initial_window_size = value,
                SettingId::MaxFrameSize if !(16_384..=MAX_FRAME_LEN).contains(&value) => {
                    return Err(FrameError::Setting(id, value));
                }
                SettingId::MaxFrameSize => self.max_frame_size = value,
                SettingId::MaxHeaderListSize => self.max_header_list_size = Some(value),
                SettingId::Unknown(_) => {}
            }
        }
        Ok(())
    }

    /// Encodes the values that differ from the protocol defaults.
    pub fn encode(&self) -> Bytes {
        let defaults = Settings::default();
        let mut buf = BytesMut::new();
        let mut put = |id: SettingId, value: u32| {
            buf.put_u16(id.as_u16());
            buf.put_u32(value);
        };
        if self.header_table_size != defaults.header_table_size {
            put(SettingId::HeaderTableSize, self.header_table_size);
        }
        if self.enable_push != defaults.enable_push {
            put(SettingId::EnablePush, u32::from(self.enable_push));
        }
        if let Some(v) = self.max_concurrent_streams {
            put(SettingId::MaxConcurrentStreams, v);
        }
        if self.initial_window_size != defaults.initial_window_size {
            put(SettingId::InitialWindowSize, self.initial_window_size);
        }
        if self.max_frame_size != defaults.max_frame_size {
            put(SettingId::MaxFrameSize, self.max_frame_size);
        }
        if let Some(v) = self.max_header_list_size {
            put(SettingId::MaxHeaderListSize, v);
        }
        buf.freeze()
    }
}
