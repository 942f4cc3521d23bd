//! Ethernet / IPv4 / UDP header decoding.

use crate::error::DecodeError;
use reporter_types::MacAddr;
use std::net::Ipv4Addr;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPPROTO_UDP: u8 = 17;

/// Header fields extracted from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeaders {
    pub source_mac: MacAddr,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

/// Decodes the Ethernet, IPv4 and UDP headers of a raw frame.
///
/// All three layers must decode; nothing partial is returned.
///
/// # Errors
///
/// Returns a [`DecodeError`] naming the first layer that is missing or
/// malformed.
pub fn decode(frame: &[u8]) -> Result<DecodedHeaders, DecodeError> {
    let (source_mac, ip_packet) = ethernet(frame)?;
    let (source_ip, destination_ip, datagram) = ipv4(ip_packet)?;
    let (source_port, destination_port) = udp(datagram)?;

    Ok(DecodedHeaders {
        source_mac,
        source_ip,
        destination_ip,
        source_port,
        destination_port,
    })
}

fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn ethernet(frame: &[u8]) -> Result<(MacAddr, &[u8]), DecodeError> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(DecodeError::Truncated("Ethernet"));
    }

    let mut source = [0u8; 6];
    source.copy_from_slice(&frame[6..12]);

    let mut ethertype = be16(frame, 12);
    let mut offset = ETHERNET_HEADER_LEN;

    // A single 802.1Q tag sits between the addresses and the real ethertype.
    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < ETHERNET_HEADER_LEN + VLAN_TAG_LEN {
            return Err(DecodeError::Truncated("802.1Q"));
        }
        ethertype = be16(frame, 16);
        offset += VLAN_TAG_LEN;
    }

    if ethertype != ETHERTYPE_IPV4 {
        return Err(DecodeError::NotIpv4(ethertype));
    }

    Ok((MacAddr(source), &frame[offset..]))
}

fn ipv4(packet: &[u8]) -> Result<(Ipv4Addr, Ipv4Addr, &[u8]), DecodeError> {
    if packet.len() < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::Truncated("IPv4"));
    }

    let version = packet[0] >> 4;
    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if version != 4 || header_len < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::MalformedIpv4);
    }
    if packet.len() < header_len {
        return Err(DecodeError::Truncated("IPv4"));
    }

    let total_len = usize::from(be16(packet, 2));
    if total_len < header_len {
        return Err(DecodeError::MalformedIpv4);
    }

    if be16(packet, 6) & 0x1fff != 0 {
        return Err(DecodeError::Fragment);
    }

    let protocol = packet[9];
    if protocol != IPPROTO_UDP {
        return Err(DecodeError::NotUdp(protocol));
    }

    let source = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let destination = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    // Ethernet pads short frames; a snaplen may cut long ones.
    let end = total_len.min(packet.len());
    Ok((source, destination, &packet[header_len..end]))
}

fn udp(datagram: &[u8]) -> Result<(u16, u16), DecodeError> {
    if datagram.len() < UDP_HEADER_LEN {
        return Err(DecodeError::Truncated("UDP"));
    }
    Ok((be16(datagram, 0), be16(datagram, 2)))
}
