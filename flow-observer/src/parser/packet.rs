//! Ethernet / IP / L4 header decoding.
//!
//! Only the fields the observer reports are read. Every access is bounds
//! checked; a header that does not fit is a [`ParseError::Truncated`].

use crate::errors::ParseError;
use crate::flow::{Ethernet, Ip, IpVersion, Layer4, TcpFlags};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const TCP_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const ICMP_HEADER_LEN: usize = 4;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// Headers found in a captured packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketSummary {
    pub ethernet: Option<Ethernet>,
    pub ip: Option<Ip>,
    pub l4: Option<Layer4>,
}

/// Decode the headers of an Ethernet frame. An empty frame yields an empty
/// summary; unknown ethertypes and L4 protocols stop decoding at that layer.
pub fn decode_packet(data: &[u8]) -> Result<PacketSummary, ParseError> {
    let mut summary = PacketSummary::default();
    if data.is_empty() {
        return Ok(summary);
    }

    check_len("Ethernet", data, ETHERNET_HEADER_LEN)?;
    summary.ethernet = Some(Ethernet {
        destination: format_mac(&data[0..6]),
        source: format_mac(&data[6..12]),
    });

    let payload = &data[ETHERNET_HEADER_LEN..];
    let (ip, protocol, l4_data) = match u16_at(data, 12) {
        ETHERTYPE_IPV4 => decode_ipv4(payload)?,
        ETHERTYPE_IPV6 => decode_ipv6(payload)?,
        _ => return Ok(summary),
    };
    summary.ip = Some(ip);
    summary.l4 = decode_l4(protocol, l4_data)?;

    Ok(summary)
}

fn decode_ipv4(data: &[u8]) -> Result<(Ip, u8, &[u8]), ParseError> {
    check_len("IPv4", data, IPV4_MIN_HEADER_LEN)?;
    let version = data[0] >> 4;
    if version != 4 {
        return Err(ParseError::UnsupportedIpVersion(version));
    }

    let header_len = usize::from(data[0] & 0x0f) * 4;
    check_len("IPv4", data, header_len.max(IPV4_MIN_HEADER_LEN))?;

    let ip = Ip {
        source: IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15])),
        destination: IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19])),
        version: IpVersion::V4,
    };
    Ok((ip, data[9], &data[header_len.max(IPV4_MIN_HEADER_LEN)..]))
}

fn decode_ipv6(data: &[u8]) -> Result<(Ip, u8, &[u8]), ParseError> {
    check_len("IPv6", data, IPV6_HEADER_LEN)?;
    let version = data[0] >> 4;
    if version != 6 {
        return Err(ParseError::UnsupportedIpVersion(version));
    }

    let address = |at: usize| {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&data[at..at + 16]);
        IpAddr::V6(Ipv6Addr::from(octets))
    };
    let ip = Ip {
        source: address(8),
        destination: address(24),
        version: IpVersion::V6,
    };
    Ok((ip, data[6], &data[IPV6_HEADER_LEN..]))
}

fn decode_l4(protocol: u8, data: &[u8]) -> Result<Option<Layer4>, ParseError> {
    let l4 = match protocol {
        IPPROTO_TCP => {
            check_len("TCP", data, TCP_MIN_HEADER_LEN)?;
            Layer4::Tcp {
                source_port: u16_at(data, 0),
                destination_port: u16_at(data, 2),
                flags: TcpFlags::from_bits(data[13]),
            }
        }
        IPPROTO_UDP => {
            check_len("UDP", data, UDP_HEADER_LEN)?;
            Layer4::Udp {
                source_port: u16_at(data, 0),
                destination_port: u16_at(data, 2),
            }
        }
        IPPROTO_ICMP => {
            check_len("ICMPv4", data, ICMP_HEADER_LEN)?;
            Layer4::Icmpv4 {
                icmp_type: data[0],
                code: data[1],
            }
        }
        IPPROTO_ICMPV6 => {
            check_len("ICMPv6", data, ICMP_HEADER_LEN)?;
            Layer4::Icmpv6 {
                icmp_type: data[0],
                code: data[1],
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(l4))
}

fn check_len(layer: &'static str, data: &[u8], required: usize) -> Result<(), ParseError> {
    if data.len() < required {
        return Err(ParseError::Truncated {
            layer,
            len: data.len(),
            required,
        });
    }
    Ok(())
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn format_mac(octets: &[u8]) -> String {
    octets
        .iter()
        .map(|octet| format!("{:02x}", octet))
        .collect::<Vec<_>>()
        .join(":")
}
