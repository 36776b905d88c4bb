use crate::{
    error::DecodeError,
    protocol::{AddressType, Command, Version},
};

const IPV4_LEN: usize = 4;
const IPV6_LEN: usize = 16;
const PORT_LEN: usize = 2;

/// TargetAddress is a decoded ATYP/DST.ADDR/DST.PORT triple. The wire
/// bytes are kept so replies can echo them unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub addr_type: AddressType,
    pub host: String,
    pub port: u16,
    encoded: Vec<u8>,
}

impl TargetAddress {
    /// encoded returns ATYP + address + port exactly as received
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }
}

/// ConnectRequest is a decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Raw CMD byte; anything is served as CONNECT
    pub command: u8,
    pub target: TargetAddress,
}

impl ConnectRequest {
    /// named_command maps the CMD byte onto the known constants
    pub fn named_command(&self) -> Option<Command> {
        Command::from_byte(self.command)
    }
}

/// check_greeting verifies a greeting looks like SOCKS5 and returns its
/// length. The result is advisory: the server answers no-auth regardless.
pub fn check_greeting(data: &[u8]) -> Result<usize, DecodeError> {
    let (&version, rest) = data
        .split_first()
        .ok_or(DecodeError::Truncated { needed: 2, got: 0 })?;

    if version != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(version));
    }

    let n_methods = *rest.first().ok_or(DecodeError::Truncated {
        needed: 2,
        got: data.len(),
    })? as usize;

    if data.len() < 2 + n_methods {
        return Err(DecodeError::Truncated {
            needed: 2 + n_methods,
            got: data.len(),
        });
    }

    Ok(2 + n_methods)
}

/// parse_request decodes VER CMD RSV + address triple and returns the
/// request with the number of bytes it consumed
pub fn parse_request(data: &[u8]) -> Result<(ConnectRequest, usize), DecodeError> {
    if data.len() < 3 {
        return Err(DecodeError::Truncated {
            needed: 3,
            got: data.len(),
        });
    }

    // Ensure version is 0x05 -> SOCKS5
    if data[0] != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(data[0]));
    }

    // Not validating RSV (RESERVED) -> data[2]
    let (target, consumed) = decode_target(&data[3..])?;

    let request = ConnectRequest {
        command: data[1],
        target,
    };

    Ok((request, 3 + consumed))
}

/// decode_target parses an ATYP/ADDR/PORT triple from the start of `data`
/// and returns it with the number of bytes consumed.
///
/// IPv4 and IPv6 hosts are the raw address octets read as ASCII text, not
/// dotted/colon notation. Clients that send binary addresses therefore
/// end up with a host string that does not resolve.
pub fn decode_target(data: &[u8]) -> Result<(TargetAddress, usize), DecodeError> {
    let atyp = *data
        .first()
        .ok_or(DecodeError::Truncated { needed: 1, got: 0 })?;

    let addr_type = AddressType::from_byte(atyp).ok_or(DecodeError::UnsupportedAddressType(atyp))?;

    // Offset of the first address byte and its length
    let (start, addr_len) = match addr_type {
        AddressType::IPv4 => (1, IPV4_LEN),
        AddressType::IPv6 => (1, IPV6_LEN),
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            let len = *data.get(1).ok_or(DecodeError::Truncated {
                needed: 2,
                got: data.len(),
            })?;
            (2, len as usize)
        }
    };

    let end = start + addr_len + PORT_LEN;
    if data.len() < end {
        return Err(DecodeError::Truncated {
            needed: end,
            got: data.len(),
        });
    }

    let raw_addr = &data[start..start + addr_len];
    let host = match addr_type {
        AddressType::IPv4 | AddressType::IPv6 => {
            if !raw_addr.is_ascii() {
                return Err(DecodeError::NonAsciiAddress);
            }
            String::from_utf8(raw_addr.to_vec())?
        }
        AddressType::DomainName => String::from_utf8(raw_addr.to_vec())?,
    };

    // Grab port -> BigEndian (network order)
    let port = u16::from_be_bytes([data[end - 2], data[end - 1]]);

    let target = TargetAddress {
        addr_type,
        host,
        port,
        encoded: encode_target(addr_type, &data[1..end]),
    };

    Ok((target, end))
}

/// encode_target prefixes the raw address + port bytes with their type
pub fn encode_target(addr_type: AddressType, raw_addr_and_port: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + raw_addr_and_port.len());
    bytes.push(addr_type as u8);
    bytes.extend_from_slice(raw_addr_and_port);
    bytes
}
