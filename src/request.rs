use std::convert::TryFrom;

use crate::{
    error::MessageError,
    packet::{ObserveOption, Packet},
    MessageClass, MessageType, RequestType,
};

/// A CoAP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapRequest {
    pub message: Packet,
}

impl CoapRequest {
    pub fn new(method: RequestType, path: &str) -> CoapRequest {
        let mut message = Packet::new();
        message.set_code(MessageClass::Request(method));
        message.set_path(path);
        CoapRequest { message }
    }

    /// A GET request with the given token, message id and type.
    pub fn get(
        path: &str,
        token: Vec<u8>,
        message_id: u16,
        message_type: MessageType,
    ) -> Result<CoapRequest, MessageError> {
        let mut request = CoapRequest::new(RequestType::Get, path);
        request.message.set_token(token)?;
        request.message.set_message_id(message_id);
        request.message.set_type(message_type);
        Ok(request)
    }

    /// Wraps a decoded packet if it carries a request code in a
    /// confirmable or non-confirmable message.
    pub fn from_packet(packet: Packet) -> Option<CoapRequest> {
        match packet.code() {
            MessageClass::Request(_) => {}
            _ => return None,
        }
        match packet.message_type() {
            MessageType::Confirmable | MessageType::NonConfirmable => {}
            _ => return None,
        }
        Some(CoapRequest { message: packet })
    }

    /// The request method; `None` if the code was changed to a non-request
    /// one through `message`.
    pub fn method(&self) -> Option<RequestType> {
        match self.message.code() {
            MessageClass::Request(rt) => Some(rt),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        self.message.path()
    }

    pub fn set_observe_flag(&mut self, flag: ObserveOption) {
        self.message.set_observe_value(flag.into());
    }

    /// The Observe flag; `None` when the option is absent or carries a
    /// value other than register/deregister.
    pub fn observe_flag(&self) -> Option<ObserveOption> {
        self.message
            .observe_value()
            .and_then(|v| ObserveOption::try_from(v).ok())
    }

    pub fn token(&self) -> &[u8] {
        self.message.token()
    }

    pub fn is_confirmable(&self) -> bool {
        self.message.message_type() == MessageType::Confirmable
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ResponseType;

    #[test]
    fn creation_from_packet() {
        let mut packet = Packet::new();
        packet.set_code(MessageClass::Request(RequestType::Get));
        assert!(CoapRequest::from_packet(packet).is_some());

        let mut packet = Packet::new();
        packet.set_code(MessageClass::Response(ResponseType::BadGateway));
        assert!(CoapRequest::from_packet(packet).is_none());
    }

    #[test]
    fn acknowledgement_is_not_a_request() {
        for mtyp in vec![MessageType::Acknowledgement, MessageType::Reset] {
            let mut packet = Packet::new();
            packet.set_type(mtyp);
            packet.set_code(MessageClass::Request(RequestType::Get));
            assert!(CoapRequest::from_packet(packet).is_none());
        }
    }

    #[test]
    fn observe_flags() {
        let mut request = CoapRequest::new(RequestType::Get, "/observe");
        assert_eq!(None, request.observe_flag());
        request.set_observe_flag(ObserveOption::Register);
        assert_eq!(Some(ObserveOption::Register), request.observe_flag());
        request.set_observe_flag(ObserveOption::Deregister);
        assert_eq!(Some(ObserveOption::Deregister), request.observe_flag());
        request.message.set_observe_value(5);
        assert_eq!(None, request.observe_flag());
    }

    #[test]
    fn non_request_code_has_no_method() {
        let mut request = CoapRequest::new(RequestType::Put, "/observe");
        assert_eq!(Some(RequestType::Put), request.method());
        request
            .message
            .set_code(MessageClass::Response(ResponseType::Content));
        assert_eq!(None, request.method());
    }

    #[test]
    fn get_builder() {
        let request = CoapRequest::get(
            "/oic/res",
            vec![1, 2, 3],
            42,
            MessageType::NonConfirmable,
        )
        .unwrap();
        assert_eq!(Some(RequestType::Get), request.method());
        assert_eq!("oic/res", request.path());
        assert_eq!(&[1, 2, 3], request.token());
        assert_eq!(42, request.message.message_id());
        assert!(!request.is_confirmable());
    }
}
