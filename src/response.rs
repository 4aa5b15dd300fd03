use crate::{
    packet::{ContentFormat, Packet},
    CoapRequest, MessageClass, MessageType, ResponseType,
};

/// A CoAP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapResponse {
    pub message: Packet,
}

impl CoapResponse {
    /// Creates the response to `request`: piggybacked on the ACK for a
    /// confirmable request, a non-confirmable message otherwise. The caller
    /// assigns a fresh message id in the latter case.
    pub fn from_request(
        request: &CoapRequest,
        status: ResponseType,
    ) -> CoapResponse {
        let mut message = Packet::new();
        if request.is_confirmable() {
            message.set_type(MessageType::Acknowledgement);
            message.set_message_id(request.message.message_id());
        } else {
            message.set_type(MessageType::NonConfirmable);
        }
        message.set_code(MessageClass::Response(status));
        // the request token already passed header validation
        let _ = message.set_token(request.token().to_vec());
        CoapResponse { message }
    }

    pub fn from_packet(packet: Packet) -> Option<CoapResponse> {
        match packet.code() {
            MessageClass::Response(_) => Some(CoapResponse { message: packet }),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<ResponseType> {
        match self.message.code() {
            MessageClass::Response(rt) => Some(rt),
            _ => None,
        }
    }

    pub fn set_status(&mut self, status: ResponseType) {
        self.message.set_code(MessageClass::Response(status));
    }

    /// Sets a text/plain body.
    pub fn set_text(&mut self, body: &str) {
        self.message.set_content_format(ContentFormat::TextPlain);
        self.message.payload = body.as_bytes().to_vec();
    }

    pub fn observe_value(&self) -> Option<u32> {
        self.message.observe_value()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RequestType;

    #[test]
    fn piggybacked_on_confirmable() {
        let request =
            CoapRequest::get("/observe", vec![9], 77, MessageType::Confirmable)
                .unwrap();
        let response = CoapResponse::from_request(&request, ResponseType::Content);
        assert_eq!(MessageType::Acknowledgement, response.message.message_type());
        assert_eq!(77, response.message.message_id());
        assert_eq!(&[9], response.message.token());
    }

    #[test]
    fn separate_for_non_confirmable() {
        let request = CoapRequest::get(
            "/oic/res",
            vec![1, 2],
            5,
            MessageType::NonConfirmable,
        )
        .unwrap();
        let mut response =
            CoapResponse::from_request(&request, ResponseType::Content);
        response.set_text("mcast response");
        assert_eq!(MessageType::NonConfirmable, response.message.message_type());
        assert_eq!(Some(ContentFormat::TextPlain), response.message.content_format());
        assert_eq!(b"mcast response".to_vec(), response.message.payload);
    }

    #[test]
    fn from_packet_checks_class() {
        let mut packet = Packet::new();
        packet.set_code(MessageClass::Request(RequestType::Get));
        assert!(CoapResponse::from_packet(packet).is_none());

        let mut packet = Packet::new();
        packet.set_code(MessageClass::Response(ResponseType::NotFound));
        let response = CoapResponse::from_packet(packet).unwrap();
        assert_eq!(Some(ResponseType::NotFound), response.status());
    }
}
