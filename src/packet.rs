use std::{collections::BTreeMap, convert::TryFrom, fmt};

use crate::{
    error::{InvalidContentFormat, InvalidObserve, MessageError},
    header::{Header, HEADER_LEN},
    MessageClass, MessageType,
};

/// Largest datagram we are willing to produce.
pub const MAX_PACKET_LEN: usize = 1280;

const PAYLOAD_MARKER: u8 = 0xFF;

/// The CoAP options this crate reads or writes by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapOption {
    IfMatch,
    UriHost,
    ETag,
    IfNoneMatch,
    Observe,
    UriPort,
    LocationPath,
    UriPath,
    ContentFormat,
    MaxAge,
    UriQuery,
    Accept,
    LocationQuery,
    Block2,
    Block1,
    ProxyUri,
    ProxyScheme,
    Size1,
    Size2,
    Unknown(u16),
}

impl fmt::Display for CoapOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoapOption::IfMatch => write!(f, "If-Match"),
            CoapOption::UriHost => write!(f, "Uri-Host"),
            CoapOption::ETag => write!(f, "ETag"),
            CoapOption::IfNoneMatch => write!(f, "If-None-Match"),
            CoapOption::Observe => write!(f, "Observe"),
            CoapOption::UriPort => write!(f, "Uri-Port"),
            CoapOption::LocationPath => write!(f, "Location-Path"),
            CoapOption::UriPath => write!(f, "Uri-Path"),
            CoapOption::ContentFormat => write!(f, "Content-Format"),
            CoapOption::MaxAge => write!(f, "Max-Age"),
            CoapOption::UriQuery => write!(f, "Uri-Query"),
            CoapOption::Accept => write!(f, "Accept"),
            CoapOption::LocationQuery => write!(f, "Location-Query"),
            CoapOption::Block2 => write!(f, "Block2"),
            CoapOption::Block1 => write!(f, "Block1"),
            CoapOption::ProxyUri => write!(f, "Proxy-Uri"),
            CoapOption::ProxyScheme => write!(f, "Proxy-Scheme"),
            CoapOption::Size1 => write!(f, "Size1"),
            CoapOption::Size2 => write!(f, "Size2"),
            CoapOption::Unknown(n) => write!(f, "Unknown - {}", n),
        }
    }
}

impl From<u16> for CoapOption {
    fn from(number: u16) -> CoapOption {
        match number {
            1 => CoapOption::IfMatch,
            3 => CoapOption::UriHost,
            4 => CoapOption::ETag,
            5 => CoapOption::IfNoneMatch,
            6 => CoapOption::Observe,
            7 => CoapOption::UriPort,
            8 => CoapOption::LocationPath,
            11 => CoapOption::UriPath,
            12 => CoapOption::ContentFormat,
            14 => CoapOption::MaxAge,
            15 => CoapOption::UriQuery,
            17 => CoapOption::Accept,
            20 => CoapOption::LocationQuery,
            23 => CoapOption::Block2,
            27 => CoapOption::Block1,
            28 => CoapOption::Size2,
            35 => CoapOption::ProxyUri,
            39 => CoapOption::ProxyScheme,
            60 => CoapOption::Size1,
            _ => CoapOption::Unknown(number),
        }
    }
}

impl From<CoapOption> for u16 {
    fn from(option: CoapOption) -> u16 {
        match option {
            CoapOption::IfMatch => 1,
            CoapOption::UriHost => 3,
            CoapOption::ETag => 4,
            CoapOption::IfNoneMatch => 5,
            CoapOption::Observe => 6,
            CoapOption::UriPort => 7,
            CoapOption::LocationPath => 8,
            CoapOption::UriPath => 11,
            CoapOption::ContentFormat => 12,
            CoapOption::MaxAge => 14,
            CoapOption::UriQuery => 15,
            CoapOption::Accept => 17,
            CoapOption::LocationQuery => 20,
            CoapOption::Block2 => 23,
            CoapOption::Block1 => 27,
            CoapOption::Size2 => 28,
            CoapOption::ProxyUri => 35,
            CoapOption::ProxyScheme => 39,
            CoapOption::Size1 => 60,
            CoapOption::Unknown(number) => number,
        }
    }
}

/// The content formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    TextPlain,
    ApplicationLinkFormat,
    ApplicationXML,
    ApplicationOctetStream,
    ApplicationEXI,
    ApplicationJSON,
    ApplicationCBOR,
}

impl TryFrom<u32> for ContentFormat {
    type Error = InvalidContentFormat;

    fn try_from(number: u32) -> Result<ContentFormat, InvalidContentFormat> {
        match number {
            0 => Ok(ContentFormat::TextPlain),
            40 => Ok(ContentFormat::ApplicationLinkFormat),
            41 => Ok(ContentFormat::ApplicationXML),
            42 => Ok(ContentFormat::ApplicationOctetStream),
            47 => Ok(ContentFormat::ApplicationEXI),
            50 => Ok(ContentFormat::ApplicationJSON),
            60 => Ok(ContentFormat::ApplicationCBOR),
            _ => Err(InvalidContentFormat),
        }
    }
}

impl From<ContentFormat> for u32 {
    fn from(format: ContentFormat) -> u32 {
        match format {
            ContentFormat::TextPlain => 0,
            ContentFormat::ApplicationLinkFormat => 40,
            ContentFormat::ApplicationXML => 41,
            ContentFormat::ApplicationOctetStream => 42,
            ContentFormat::ApplicationEXI => 47,
            ContentFormat::ApplicationJSON => 50,
            ContentFormat::ApplicationCBOR => 60,
        }
    }
}

/// The values of the observe option in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOption {
    Register,
    Deregister,
}

impl TryFrom<u32> for ObserveOption {
    type Error = InvalidObserve;

    fn try_from(number: u32) -> Result<ObserveOption, InvalidObserve> {
        match number {
            0 => Ok(ObserveOption::Register),
            1 => Ok(ObserveOption::Deregister),
            _ => Err(InvalidObserve),
        }
    }
}

impl From<ObserveOption> for u32 {
    fn from(observe: ObserveOption) -> u32 {
        match observe {
            ObserveOption::Register => 0,
            ObserveOption::Deregister => 1,
        }
    }
}

/// Option values keyed by option number, in ascending order as required
/// by the delta encoding.
pub type Options = BTreeMap<u16, Vec<Vec<u8>>>;

/// Encodes an unsigned option value in the minimal number of bytes.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decodes an unsigned option value; anything wider than four bytes is
/// rejected.
pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0, |acc, &b| (acc << 8) | b as u32))
}

/// A CoAP message as carried in a single UDP datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    token: Vec<u8>,
    options: Options,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new() -> Packet {
        Default::default()
    }

    /// An empty message (code 0.00) of the given type, used for bare
    /// acknowledgements and resets.
    pub fn empty(message_type: MessageType, message_id: u16) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.message_id = message_id;
        packet
    }

    pub fn options(
        &self,
    ) -> impl Iterator<Item = (CoapOption, &Vec<Vec<u8>>)> + '_ {
        self.options.iter().map(|(n, v)| (CoapOption::from(*n), v))
    }

    pub fn set_token(&mut self, token: Vec<u8>) -> Result<(), MessageError> {
        if token.len() > 8 {
            return Err(MessageError::InvalidTokenLength);
        }
        self.header.set_token_length(token.len() as u8)?;
        self.token = token;
        Ok(())
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn set_option(&mut self, tp: CoapOption, values: Vec<Vec<u8>>) {
        self.options.insert(tp.into(), values);
    }

    pub fn option(&self, tp: CoapOption) -> Option<&Vec<Vec<u8>>> {
        self.options.get(&tp.into())
    }

    pub fn add_option(&mut self, tp: CoapOption, value: Vec<u8>) {
        self.options.entry(tp.into()).or_default().push(value);
    }

    pub fn clear_option(&mut self, tp: CoapOption) {
        self.options.remove(&tp.into());
    }

    pub fn set_content_format(&mut self, cf: ContentFormat) {
        self.set_option(CoapOption::ContentFormat, vec![encode_uint(cf.into())]);
    }

    pub fn content_format(&self) -> Option<ContentFormat> {
        let value = self.option(CoapOption::ContentFormat)?.first()?;
        ContentFormat::try_from(decode_uint(value)?).ok()
    }

    /// Sets the Observe option to `value`, truncated to 24 bits.
    pub fn set_observe_value(&mut self, value: u32) {
        self.set_option(
            CoapOption::Observe,
            vec![encode_uint(value & 0x00FF_FFFF)],
        );
    }

    pub fn observe_value(&self) -> Option<u32> {
        decode_uint(self.option(CoapOption::Observe)?.first()?)
    }

    pub fn set_path(&mut self, path: &str) {
        self.clear_option(CoapOption::UriPath);
        let segments = path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec())
            .collect::<Vec<_>>();
        if !segments.is_empty() {
            self.set_option(CoapOption::UriPath, segments);
        }
    }

    /// The Uri-Path segments joined with '/', without a leading slash.
    pub fn path(&self) -> String {
        match self.option(CoapOption::UriPath) {
            Some(segments) => segments
                .iter()
                .filter_map(|s| std::str::from_utf8(s).ok())
                .collect::<Vec<_>>()
                .join("/"),
            None => String::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    pub fn set_type(&mut self, message_type: MessageType) {
        self.header.set_type(message_type);
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    pub fn set_message_id(&mut self, message_id: u16) {
        self.header.message_id = message_id;
    }

    pub fn code(&self) -> MessageClass {
        self.header.code
    }

    pub fn set_code(&mut self, code: MessageClass) {
        self.header.code = code;
    }

    /// Decodes a datagram.
    pub fn from_bytes(buf: &[u8]) -> Result<Packet, MessageError> {
        let header = Header::try_from(buf)?;
        let token_end = HEADER_LEN + header.token_length() as usize;
        if header.token_length() > 8 || token_end > buf.len() {
            return Err(MessageError::InvalidTokenLength);
        }
        let token = buf[HEADER_LEN..token_end].to_vec();

        let mut idx = token_end;
        let options = decode_options(&mut idx, buf)?;
        let payload = if idx < buf.len() {
            // decode_options stops on the marker; a marker with nothing
            // behind it is a format error
            if idx + 1 == buf.len() {
                return Err(MessageError::InvalidPacketLength);
            }
            buf[idx + 1..].to_vec()
        } else {
            Vec::new()
        };

        if header.code == MessageClass::Empty
            && (!token.is_empty() || !options.is_empty() || !payload.is_empty())
        {
            return Err(MessageError::InvalidHeader);
        }

        Ok(Packet {
            header,
            token,
            options,
            payload,
        })
    }

    /// Encodes the message into a datagram.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let options = encode_options(&self.options)?;
        let has_payload =
            self.header.code != MessageClass::Empty && !self.payload.is_empty();
        let len = HEADER_LEN
            + self.token.len()
            + options.len()
            + if has_payload { 1 + self.payload.len() } else { 0 };
        if len > MAX_PACKET_LEN {
            return Err(MessageError::InvalidPacketLength);
        }

        let mut buf = Vec::with_capacity(len);
        self.header.serialize_into(&mut buf);
        buf.extend_from_slice(&self.token);
        buf.extend_from_slice(&options);
        if has_payload {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }
        Ok(buf)
    }
}

/// Reads an extended delta or length nibble.
fn read_extended(
    nibble: u8,
    idx: &mut usize,
    buf: &[u8],
    err: MessageError,
) -> Result<usize, MessageError> {
    match nibble {
        13 => {
            let b = *buf.get(*idx).ok_or(err)?;
            *idx += 1;
            Ok(b as usize + 13)
        }
        14 => {
            if *idx + 1 >= buf.len() {
                return Err(err);
            }
            let v = u16::from_be_bytes([buf[*idx], buf[*idx + 1]]);
            *idx += 2;
            Ok(v as usize + 269)
        }
        15 => Err(err),
        n => Ok(n as usize),
    }
}

/// Decodes the option section starting at `idx`, leaving `idx` on the
/// payload marker or at the end of the buffer.
pub fn decode_options(
    idx: &mut usize,
    buf: &[u8],
) -> Result<Options, MessageError> {
    let mut number: usize = 0;
    let mut options = Options::new();

    while *idx < buf.len() && buf[*idx] != PAYLOAD_MARKER {
        let byte = buf[*idx];
        *idx += 1;

        let delta =
            read_extended(byte >> 4, idx, buf, MessageError::InvalidOptionDelta)?;
        let length =
            read_extended(byte & 0x0F, idx, buf, MessageError::InvalidOptionLength)?;

        number += delta;
        if number > u16::MAX as usize {
            return Err(MessageError::InvalidOptionDelta);
        }

        let end = *idx + length;
        if end > buf.len() {
            return Err(MessageError::InvalidOptionLength);
        }
        options
            .entry(number as u16)
            .or_default()
            .push(buf[*idx..end].to_vec());
        *idx = end;
    }
    Ok(options)
}

fn nibble(value: usize) -> u8 {
    match value {
        0..=12 => value as u8,
        13..=268 => 13,
        _ => 14,
    }
}

fn push_extended(value: usize, out: &mut Vec<u8>) {
    match value {
        0..=12 => {}
        13..=268 => out.push((value - 13) as u8),
        _ => out.extend_from_slice(&((value - 269) as u16).to_be_bytes()),
    }
}

pub fn encode_options(options: &Options) -> Result<Vec<u8>, MessageError> {
    let mut last = 0usize;
    let mut out = Vec::new();
    for (number, values) in options {
        for value in values {
            if value.len() > u16::MAX as usize + 269 {
                return Err(MessageError::InvalidOptionLength);
            }
            let delta = *number as usize - last;
            out.push(nibble(delta) << 4 | nibble(value.len()));
            push_extended(delta, &mut out);
            push_extended(value.len(), &mut out);
            out.extend_from_slice(value);
            last = *number as usize;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RequestType, ResponseType};

    #[test]
    fn decode_request_with_options() {
        let buf = [
            0x44, 0x01, 0x84, 0x9e, 0x51, 0x55, 0x77, 0xe8, 0xb2, 0x48, 0x69,
            0x04, 0x54, 0x65, 0x73, 0x74, 0x43, 0x61, 0x3d, 0x31,
        ];
        let packet = Packet::from_bytes(&buf).unwrap();
        assert_eq!(MessageType::Confirmable, packet.message_type());
        assert_eq!(MessageClass::Request(RequestType::Get), packet.code());
        assert_eq!(33950, packet.message_id());
        assert_eq!(&[0x51, 0x55, 0x77, 0xE8], packet.token());
        assert_eq!("Hi/Test", packet.path());
        assert_eq!(
            Some(&vec![b"a=1".to_vec()]),
            packet.option(CoapOption::UriQuery)
        );
    }

    #[test]
    fn decode_response_with_payload() {
        let buf = [
            0x64, 0x45, 0x13, 0xFD, 0xD0, 0xE2, 0x4D, 0xAC, 0xFF, 0x48, 0x65,
            0x6C, 0x6C, 0x6F,
        ];
        let packet = Packet::from_bytes(&buf).unwrap();
        assert_eq!(MessageType::Acknowledgement, packet.message_type());
        assert_eq!(
            MessageClass::Response(ResponseType::Content),
            packet.code()
        );
        assert_eq!(5117, packet.message_id());
        assert_eq!(b"Hello".to_vec(), packet.payload);
    }

    #[test]
    fn encode_request_with_options() {
        let mut packet = Packet::new();
        packet.set_type(MessageType::Confirmable);
        packet.set_code(MessageClass::Request(RequestType::Get));
        packet.set_message_id(33950);
        packet.set_token(vec![0x51, 0x55, 0x77, 0xE8]).unwrap();
        packet.set_path("/Hi/Test");
        packet.add_option(CoapOption::UriQuery, b"a=1".to_vec());
        assert_eq!(
            vec![
                0x44, 0x01, 0x84, 0x9e, 0x51, 0x55, 0x77, 0xe8, 0xb2, 0x48,
                0x69, 0x04, 0x54, 0x65, 0x73, 0x74, 0x43, 0x61, 0x3d, 0x31
            ],
            packet.to_bytes().unwrap()
        );
    }

    #[test]
    fn options_are_written_in_number_order() {
        let mut packet = Packet::new();
        packet.set_code(MessageClass::Response(ResponseType::Content));
        packet.set_content_format(ContentFormat::TextPlain);
        packet.set_observe_value(2);
        packet.add_option(CoapOption::Size1, vec![1]);
        let bytes = packet.to_bytes().unwrap();
        // Observe (6), Content-Format (12, delta 6, empty), Size1 (60, delta 48)
        assert_eq!(&bytes[4..], &[0x61, 0x02, 0x60, 0xD1, 48 - 13, 0x01]);
    }

    #[test]
    fn extended_delta_and_length() {
        let mut packet = Packet::new();
        packet.set_code(MessageClass::Request(RequestType::Get));
        packet.add_option(CoapOption::Unknown(300), vec![7; 20]);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(0xED, bytes[4]);
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(
            Some(&vec![vec![7; 20]]),
            decoded.option(CoapOption::Unknown(300))
        );
    }

    #[test]
    fn reserved_nibbles_are_rejected() {
        let buf = [0x40, 0x01, 0x00, 0x01, 0xF0];
        assert_eq!(
            MessageError::InvalidOptionDelta,
            Packet::from_bytes(&buf).unwrap_err()
        );
        let buf = [0x40, 0x01, 0x00, 0x01, 0x1F];
        assert_eq!(
            MessageError::InvalidOptionLength,
            Packet::from_bytes(&buf).unwrap_err()
        );
    }

    #[test]
    fn truncated_option_value() {
        let buf = [0x40, 0x01, 0x00, 0x01, 0xB4, b'a'];
        assert_eq!(
            MessageError::InvalidOptionLength,
            Packet::from_bytes(&buf).unwrap_err()
        );
    }

    #[test]
    fn marker_without_payload() {
        let buf = [0x40, 0x45, 0x00, 0x01, 0xFF];
        assert_eq!(
            MessageError::InvalidPacketLength,
            Packet::from_bytes(&buf).unwrap_err()
        );
    }

    #[test]
    fn empty_message_must_be_bare() {
        let buf = [0x61, 0x00, 0x00, 0x01, 0xAA];
        assert_eq!(
            MessageError::InvalidHeader,
            Packet::from_bytes(&buf).unwrap_err()
        );
        let ack = Packet::empty(MessageType::Acknowledgement, 7);
        assert_eq!(vec![0x60, 0x00, 0x00, 0x07], ack.to_bytes().unwrap());
    }

    #[test]
    fn observe_value() {
        let mut p = Packet::new();
        assert_eq!(None, p.observe_value());
        p.set_observe_value(0);
        assert_eq!(Some(&vec![vec![]]), p.option(CoapOption::Observe));
        assert_eq!(Some(0), p.observe_value());
        p.set_observe_value(0x0102_0304);
        assert_eq!(Some(0x020304), p.observe_value());
    }

    #[test]
    fn content_format() {
        let mut p = Packet::new();
        assert!(p.content_format().is_none());
        p.set_content_format(ContentFormat::ApplicationJSON);
        assert_eq!(Some(ContentFormat::ApplicationJSON), p.content_format());
        p.set_content_format(ContentFormat::TextPlain);
        assert_eq!(Some(ContentFormat::TextPlain), p.content_format());
    }

    #[test]
    fn path_normalisation() {
        let mut p = Packet::new();
        p.set_path("/oic/res");
        assert_eq!("oic/res", p.path());
        p.set_path("observe");
        assert_eq!("observe", p.path());
        p.set_path("/");
        assert_eq!("", p.path());
    }

    #[test]
    fn oversized_packet() {
        let mut p = Packet::new();
        p.set_code(MessageClass::Response(ResponseType::Content));
        p.payload = vec![0; MAX_PACKET_LEN];
        assert_eq!(MessageError::InvalidPacketLength, p.to_bytes().unwrap_err());
    }

    #[test]
    fn uint_encoding() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(vec![0x01, 0x00], encode_uint(256));
        assert_eq!(Some(256), decode_uint(&[0x01, 0x00]));
        assert_eq!(None, decode_uint(&[1, 2, 3, 4, 5]));
    }
}
