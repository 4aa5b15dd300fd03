use std::convert::TryFrom;

use crate::{error::MessageError, MessageClass, MessageType};

/// Size of the fixed part of a CoAP header.
pub const HEADER_LEN: usize = 4;

/// The fixed four-byte message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    ver_type_tkl: u8,
    pub code: MessageClass,
    pub message_id: u16,
}

impl Default for Header {
    fn default() -> Header {
        Header {
            ver_type_tkl: 0x40, // version 1, confirmable, no token
            code: MessageClass::Empty,
            message_id: 0,
        }
    }
}

impl Header {
    pub fn new() -> Header {
        Default::default()
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_type_tkl >> 6
    }

    #[inline]
    pub fn set_type(&mut self, t: MessageType) {
        self.ver_type_tkl = (self.ver_type_tkl & 0xCF) | t.bits() << 4;
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        MessageType::from_bits(self.ver_type_tkl >> 4)
    }

    /// Sets the token length; tokens are at most eight bytes long.
    pub fn set_token_length(&mut self, tkl: u8) -> Result<(), MessageError> {
        if tkl > 8 {
            return Err(MessageError::InvalidTokenLength);
        }
        self.ver_type_tkl = (self.ver_type_tkl & 0xF0) | tkl;
        Ok(())
    }

    #[inline]
    pub fn token_length(&self) -> u8 {
        self.ver_type_tkl & 0x0F
    }

    /// Appends the encoded header to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.ver_type_tkl);
        buf.push(self.code.into());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
    }
}

impl TryFrom<&[u8]> for Header {
    type Error = MessageError;

    fn try_from(buf: &[u8]) -> Result<Header, MessageError> {
        if buf.len() < HEADER_LEN {
            return Err(MessageError::InvalidPacketLength);
        }
        if buf[0] >> 6 != 1 {
            return Err(MessageError::InvalidHeader);
        }

        Ok(Header {
            ver_type_tkl: buf[0],
            code: buf[1].into(),
            message_id: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}
