// Wire constants for the greeting/request/reply exchange.
//
// Greeting
// +----+----------+----------+
// |VER | NMETHODS | METHODS  |
// +----+----------+----------+
// | 1  |    1     | 1 to 255 |
// +----+----------+----------+
//
// Request
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
//
// Reply: VER REP RSV followed by the request's ATYP/DST.ADDR/DST.PORT

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
pub const RSV: u8 = 0x00;

/// AddressType represents the SOCKS5 address types:
/// IPv4, Domain Name, IPv6
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
    IPv6 = 0x04,
}

/// AddressType implementation block
impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::IPv6),
            _ => None,
        }
    }
}

/// Version represents the only SOCKS version spoken here
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    SOCKS5 = 0x05,
}

/// AuthMethod represents the SOCKS5 authentication methods the server
/// can select. No-auth is always chosen.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth = 0x00,
}

/// Command represents SOCKS5 protocol commands. Only the CONNECT
/// behaviour is implemented; the value is decoded for logging.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

/// Command implementation block
impl Command {
    /// from_byte converts a byte to its related SOCKS5 protocol command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

/// ReplyCode is the REP field of a reply
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
}

/// method_selection builds the fixed answer to any greeting
pub fn method_selection() -> [u8; 2] {
    [Version::SOCKS5 as u8, AuthMethod::NoAuth as u8]
}

/// build_reply builds VER REP RSV followed by the echoed address triple
pub fn build_reply(code: ReplyCode, echoed_target: &[u8]) -> Vec<u8> {
    let mut reply = Vec::with_capacity(3 + echoed_target.len());
    reply.extend_from_slice(&[Version::SOCKS5 as u8, code as u8, RSV]);
    reply.extend_from_slice(echoed_target);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_selection_is_no_auth() {
        assert_eq!(method_selection(), [0x05, 0x00]);
    }

    #[test]
    fn reply_echoes_target_bytes() {
        let reply = build_reply(ReplyCode::GeneralFailure, &[0x01, 1, 2, 3, 4, 0x1f, 0x90]);
        assert_eq!(reply, vec![0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x1f, 0x90]);
    }

    #[test]
    fn unknown_bytes_do_not_map() {
        assert_eq!(AddressType::from_byte(0x02), None);
        assert_eq!(Command::from_byte(0x09), None);
        assert_eq!(Command::from_byte(0x02), Some(Command::Bind));
    }
}
