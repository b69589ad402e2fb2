//! Packet Header Parsing
//!
//! Best-effort L2/L3/L4 metadata extraction. Verdicts never depend on this:
//! a payload that is not a recognizable frame simply yields a parse error
//! alongside the match result.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// Parsed packet metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacketMeta {
    /// Link-layer info, present when the input was an Ethernet frame
    pub link: Option<LinkMeta>,
    /// Network-layer info
    pub net: Option<NetMeta>,
    /// Transport-layer info
    pub transport: Option<TransportMeta>,
}

/// Ethernet header fields
#[derive(Debug, Clone, Serialize)]
pub struct LinkMeta {
    pub src_mac: String,
    pub dst_mac: String,
    pub ethertype: u16,
}

/// IP header fields
#[derive(Debug, Clone, Serialize)]
pub struct NetMeta {
    pub version: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
}

/// TCP/UDP port info
#[derive(Debug, Clone, Serialize)]
pub struct TransportMeta {
    pub kind: &'static str,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Header parse failure
#[derive(Debug, Error)]
pub enum PacketParseError {
    #[error("truncated {0} header")]
    Truncated(&'static str),

    #[error("unsupported ethertype 0x{0:04x}")]
    UnsupportedEthertype(u16),

    #[error("unrecognized packet format")]
    Unrecognized,
}

/// Parse packet bytes into header metadata
///
/// Accepts either a raw IP packet or an Ethernet frame carrying one. The
/// version nibble is checked first so tunneled traffic (which is raw IP)
/// parses without a link header.
pub fn parse_packet(bytes: &[u8]) -> Result<PacketMeta, PacketParseError> {
    if bytes.is_empty() {
        return Err(PacketParseError::Truncated("packet"));
    }

    match bytes[0] >> 4 {
        4 if bytes.len() >= 20 => parse_ip(bytes, None),
        6 if bytes.len() >= 40 => parse_ip(bytes, None),
        _ => parse_ethernet(bytes),
    }
}

fn parse_ethernet(bytes: &[u8]) -> Result<PacketMeta, PacketParseError> {
    if bytes.len() < 14 {
        return Err(PacketParseError::Unrecognized);
    }

    let ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
    let link = LinkMeta {
        dst_mac: format_mac(&bytes[0..6]),
        src_mac: format_mac(&bytes[6..12]),
        ethertype,
    };

    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => parse_ip(&bytes[14..], Some(link)),
        other => Err(PacketParseError::UnsupportedEthertype(other)),
    }
}

fn parse_ip(bytes: &[u8], link: Option<LinkMeta>) -> Result<PacketMeta, PacketParseError> {
    if bytes.is_empty() {
        return Err(PacketParseError::Truncated("ip"));
    }

    let (net, l4_offset) = match bytes[0] >> 4 {
        4 => {
            if bytes.len() < 20 {
                return Err(PacketParseError::Truncated("ipv4"));
            }
            let ihl = usize::from(bytes[0] & 0x0f) * 4;
            if ihl < 20 || bytes.len() < ihl {
                return Err(PacketParseError::Truncated("ipv4 options"));
            }
            let src = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
            let dst = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);
            (
                NetMeta {
                    version: 4,
                    src_ip: IpAddr::V4(src),
                    dst_ip: IpAddr::V4(dst),
                    protocol: bytes[9],
                },
                ihl,
            )
        }
        6 => {
            if bytes.len() < 40 {
                return Err(PacketParseError::Truncated("ipv6"));
            }
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&bytes[8..24]);
            dst.copy_from_slice(&bytes[24..40]);
            (
                NetMeta {
                    version: 6,
                    src_ip: IpAddr::V6(Ipv6Addr::from(src)),
                    dst_ip: IpAddr::V6(Ipv6Addr::from(dst)),
                    protocol: bytes[6],
                },
                40,
            )
        }
        _ => return Err(PacketParseError::Unrecognized),
    };

    let transport = match net.protocol {
        PROTO_TCP | PROTO_UDP if bytes.len() >= l4_offset + 4 => Some(TransportMeta {
            kind: if net.protocol == PROTO_TCP { "tcp" } else { "udp" },
            src_port: u16::from_be_bytes([bytes[l4_offset], bytes[l4_offset + 1]]),
            dst_port: u16::from_be_bytes([bytes[l4_offset + 2], bytes[l4_offset + 3]]),
        }),
        _ => None,
    };

    Ok(PacketMeta { link, net: Some(net), transport })
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
