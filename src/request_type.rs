use std::fmt;

/// The request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestType {
    pub fn from_code(code: u8) -> Option<RequestType> {
        match code {
            0x01 => Some(RequestType::Get),
            0x02 => Some(RequestType::Post),
            0x03 => Some(RequestType::Put),
            0x04 => Some(RequestType::Delete),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RequestType::Get => 0x01,
            RequestType::Post => 0x02,
            RequestType::Put => 0x03,
            RequestType::Delete => 0x04,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RequestType::Get => "GET",
            RequestType::Post => "POST",
            RequestType::Put => "PUT",
            RequestType::Delete => "DELETE",
        };
        f.write_str(name)
    }
}
