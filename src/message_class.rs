use std::fmt;

use crate::{RequestType, ResponseType};

/// The detailed class (request/response) of a message with the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Empty,
    Request(RequestType),
    Response(ResponseType),
    Reserved(u8),
}

impl From<u8> for MessageClass {
    fn from(code: u8) -> MessageClass {
        if code == 0 {
            return MessageClass::Empty;
        }
        if let Some(rt) = RequestType::from_code(code) {
            return MessageClass::Request(rt);
        }
        match ResponseType::from_code(code) {
            Some(rt) => MessageClass::Response(rt),
            None => MessageClass::Reserved(code),
        }
    }
}

impl From<MessageClass> for u8 {
    fn from(class: MessageClass) -> u8 {
        match class {
            MessageClass::Empty => 0x00,
            MessageClass::Request(rt) => rt.code(),
            MessageClass::Response(rt) => rt.code(),
            MessageClass::Reserved(code) => code,
        }
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let code: u8 = (*self).into();
        write!(f, "{}.{:02}", code >> 5, code & 0x1F)
    }
}

impl Default for MessageClass {
    fn default() -> Self {
        MessageClass::Empty
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unassigned_codes_are_kept() {
        assert_eq!(MessageClass::Reserved(0x07), MessageClass::from(0x07));
        assert_eq!(0xE1, u8::from(MessageClass::from(0xE1)));
        assert_eq!(MessageClass::Empty, MessageClass::from(0));
    }

    #[test]
    fn dotted_notation() {
        assert_eq!("0.01", MessageClass::Request(RequestType::Get).to_string());
        assert_eq!(
            "2.05",
            MessageClass::Response(ResponseType::Content).to_string()
        );
        assert_eq!(
            "4.04",
            MessageClass::Response(ResponseType::NotFound).to_string()
        );
    }

    #[test]
    fn success_classes() {
        assert!(ResponseType::Content.is_success());
        assert!(!ResponseType::NotFound.is_success());
    }
}
