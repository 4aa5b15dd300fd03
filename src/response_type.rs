/// The response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    // 2.xx
    Created,
    Deleted,
    Valid,
    Changed,
    Content,
    Continue,

    // 4.xx
    BadRequest,
    Unauthorized,
    BadOption,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    RequestEntityIncomplete,
    PreconditionFailed,
    RequestEntityTooLarge,
    UnsupportedContentFormat,

    // 5.xx
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    ProxyingNotSupported,
}

const CODES: [(ResponseType, u8); 23] = [
    (ResponseType::Created, 0x41),
    (ResponseType::Deleted, 0x42),
    (ResponseType::Valid, 0x43),
    (ResponseType::Changed, 0x44),
    (ResponseType::Content, 0x45),
    (ResponseType::Continue, 0x5F),
    (ResponseType::BadRequest, 0x80),
    (ResponseType::Unauthorized, 0x81),
    (ResponseType::BadOption, 0x82),
    (ResponseType::Forbidden, 0x83),
    (ResponseType::NotFound, 0x84),
    (ResponseType::MethodNotAllowed, 0x85),
    (ResponseType::NotAcceptable, 0x86),
    (ResponseType::RequestEntityIncomplete, 0x88),
    (ResponseType::PreconditionFailed, 0x8C),
    (ResponseType::RequestEntityTooLarge, 0x8D),
    (ResponseType::UnsupportedContentFormat, 0x8F),
    (ResponseType::InternalServerError, 0xA0),
    (ResponseType::NotImplemented, 0xA1),
    (ResponseType::BadGateway, 0xA2),
    (ResponseType::ServiceUnavailable, 0xA3),
    (ResponseType::GatewayTimeout, 0xA4),
    (ResponseType::ProxyingNotSupported, 0xA5),
];

impl ResponseType {
    pub fn from_code(code: u8) -> Option<ResponseType> {
        CODES.iter().find(|(_, c)| *c == code).map(|(rt, _)| *rt)
    }

    pub fn code(self) -> u8 {
        CODES
            .iter()
            .find(|(rt, _)| *rt == self)
            .map(|(_, c)| *c)
            .unwrap_or(0xA0)
    }

    pub fn is_success(self) -> bool {
        self.code() >> 5 == 2
    }
}
