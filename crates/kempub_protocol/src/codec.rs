//! Framed binary message codec
//!
//! A message is serialized as
//!
//! ```text
//! [kind:1][props:1][topic_len:u16][topic][payload_len:u32][payload]
//! [client_id_len:u16][client_id][sub_id_len:u16][sub_id]
//! ```
//!
//! all integers big-endian, strings UTF-8 without terminator. The encoded
//! bytes are run through a [`Cipher`] and emitted as `[len:u16][ciphertext]`,
//! so a single on-wire frame never exceeds 65 535 bytes after encryption.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cipher::Cipher;
use crate::error::ProtocolError;

pub const MAX_TOPIC_LENGTH: usize = 2048;
pub const MAX_PAYLOAD_LENGTH: usize = 10 * 1024 * 1024;
pub const MAX_CLIENT_ID_LENGTH: usize = 40;
pub const MAX_SUBSCRIPTION_ID_LENGTH: usize = 40;
/// Upper bound of one on-wire frame after encryption, fixed by the u16
/// outer length prefix.
pub const MAX_FRAME_LENGTH: usize = u16::MAX as usize;

/// Message kinds, dense from 0. The numeric values are wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Message = 0,
    MessageAck = 1,
    Connect = 2,
    ConnectAck = 3,
    Authenticate = 4,
    AuthenticateAck = 5,
    SessionKey = 6,
    SessionKeyAck = 7,
    Publish = 8,
    PublishAck = 9,
    Subscribe = 10,
    SubscribeAck = 11,
    Unsubscribe = 12,
    UnsubscribeAck = 13,
    Ping = 14,
    Pong = 15,
    CliCommand = 16,
    CliCommandAck = 17,
    Disconnect = 18,
}

impl MessageKind {
    /// Convert from u8, returning None for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::MessageAck),
            2 => Some(Self::Connect),
            3 => Some(Self::ConnectAck),
            4 => Some(Self::Authenticate),
            5 => Some(Self::AuthenticateAck),
            6 => Some(Self::SessionKey),
            7 => Some(Self::SessionKeyAck),
            8 => Some(Self::Publish),
            9 => Some(Self::PublishAck),
            10 => Some(Self::Subscribe),
            11 => Some(Self::SubscribeAck),
            12 => Some(Self::Unsubscribe),
            13 => Some(Self::UnsubscribeAck),
            14 => Some(Self::Ping),
            15 => Some(Self::Pong),
            16 => Some(Self::CliCommand),
            17 => Some(Self::CliCommandAck),
            18 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Message property flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Properties {
    pub retained: bool,
    pub persistent: bool,
}

impl Properties {
    /// Convert flags to a single byte.
    pub fn to_byte(self) -> u8 {
        let mut props = 0u8;
        if self.retained {
            props |= 0x01;
        }
        if self.persistent {
            props |= 0x02;
        }
        props
    }

    /// Create flags from a byte. Unknown bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            retained: (byte & 0x01) != 0,
            persistent: (byte & 0x02) != 0,
        }
    }
}

/// One protocol message. Immutable after construction; the broker forwards
/// the same message to many subscribers by cloning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub properties: Properties,
    pub topic: String,
    pub payload: Vec<u8>,
    pub client_id: String,
    pub subscription_id: String,
}

impl Message {
    /// Create an empty message of the given kind. Construction sites fill
    /// in the relevant fields with struct update syntax.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            properties: Properties::default(),
            topic: String::new(),
            payload: Vec::new(),
            client_id: String::new(),
            subscription_id: String::new(),
        }
    }

    /// Serialize the message fields (without the outer envelope).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_len("topic", self.topic.len(), MAX_TOPIC_LENGTH)?;
        check_len("payload", self.payload.len(), MAX_PAYLOAD_LENGTH)?;
        check_len("client id", self.client_id.len(), MAX_CLIENT_ID_LENGTH)?;
        check_len(
            "subscription id",
            self.subscription_id.len(),
            MAX_SUBSCRIPTION_ID_LENGTH,
        )?;

        let mut buf = Vec::with_capacity(12 + self.topic.len() + self.payload.len());
        buf.push(self.kind as u8);
        buf.push(self.properties.to_byte());
        buf.extend_from_slice(&(self.topic.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.topic.as_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&(self.client_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.client_id.as_bytes());
        buf.extend_from_slice(&(self.subscription_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.subscription_id.as_bytes());
        Ok(buf)
    }

    /// Parse message fields from a decrypted frame body.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(data);

        let kind_byte = r.read_u8()?;
        let kind = MessageKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownKind(kind_byte))?;
        let properties = Properties::from_byte(r.read_u8()?);

        let topic_len = r.read_u16()? as usize;
        if topic_len > MAX_TOPIC_LENGTH {
            return Err(ProtocolError::FieldTooLong {
                field: "topic",
                len: topic_len,
                max: MAX_TOPIC_LENGTH,
            });
        }
        let topic = r.read_string(topic_len, "topic")?;

        let payload_len = r.read_u32()? as usize;
        if payload_len > MAX_PAYLOAD_LENGTH {
            return Err(ProtocolError::FieldTooLong {
                field: "payload",
                len: payload_len,
                max: MAX_PAYLOAD_LENGTH,
            });
        }
        let payload = r.read_bytes(payload_len)?.to_vec();

        let client_id_len = r.read_u16()? as usize;
        if client_id_len > MAX_CLIENT_ID_LENGTH {
            return Err(ProtocolError::FieldTooLong {
                field: "client id",
                len: client_id_len,
                max: MAX_CLIENT_ID_LENGTH,
            });
        }
        let client_id = r.read_string(client_id_len, "client id")?;

        let sub_id_len = r.read_u16()? as usize;
        if sub_id_len > MAX_SUBSCRIPTION_ID_LENGTH {
            return Err(ProtocolError::FieldTooLong {
                field: "subscription id",
                len: sub_id_len,
                max: MAX_SUBSCRIPTION_ID_LENGTH,
            });
        }
        let subscription_id = r.read_string(sub_id_len, "subscription id")?;

        Ok(Self {
            kind,
            properties,
            topic,
            payload,
            client_id,
            subscription_id,
        })
    }

    /// Encrypt the message with `cipher` and write it as one framed unit.
    pub async fn send<W: AsyncWrite + Unpin>(
        &self,
        w: &mut W,
        cipher: &dyn Cipher,
    ) -> Result<(), ProtocolError> {
        let encoded = self.encode()?;
        let encrypted = cipher.encrypt(&encoded)?;
        if encrypted.len() > MAX_FRAME_LENGTH {
            return Err(ProtocolError::FrameTooLarge {
                len: encrypted.len(),
                max: MAX_FRAME_LENGTH,
            });
        }
        w.write_all(&(encrypted.len() as u16).to_be_bytes()).await?;
        w.write_all(&encrypted).await?;
        w.flush().await?;
        Ok(())
    }
}

/// Read one framed unit, decrypt it with `cipher` and parse the message.
///
/// A clean EOF before the length prefix maps to [`ProtocolError::Closed`];
/// EOF in the middle of a frame is a framing error.
pub async fn receive<R: AsyncRead + Unpin>(
    r: &mut R,
    cipher: &dyn Cipher,
) -> Result<Message, ProtocolError> {
    let mut len_buf = [0u8; 2];
    if let Err(e) = r.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::Closed);
        }
        return Err(e.into());
    }
    let frame_len = u16::from_be_bytes(len_buf) as usize;

    let mut frame = vec![0u8; frame_len];
    if let Err(e) = r.read_exact(&mut frame).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::Truncated);
        }
        return Err(e.into());
    }

    let decrypted = cipher.decrypt(&frame)?;
    Message::decode(&decrypted)
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FieldTooLong { field, len, max });
    }
    Ok(())
}

/// Bounds-checked cursor over a frame body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.pos + n > self.buf.len() {
            return Err(ProtocolError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_string(&mut self, n: usize, field: &'static str) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
    }
}
