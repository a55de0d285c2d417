//! Minimal STUN binding client (RFC 5389) used to discover the
//! server-reflexive address advertised in the offer.

use crate::error::{RealtimeError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

const HEADER_SIZE: usize = 20;
const MAGIC_COOKIE: u32 = 0x2112A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// Default STUN port.
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// A binding request and the transaction id needed to match its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    /// 96-bit transaction id.
    pub transaction_id: [u8; 12],
}

impl BindingRequest {
    /// New request with a random transaction id.
    pub fn new() -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill(&mut transaction_id);
        Self { transaction_id }
    }

    /// Wire encoding (header only, no attributes).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u16(BINDING_REQUEST);
        buf.put_u16(0);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id);
        buf.freeze()
    }

    /// Extract the mapped address from a binding success response.
    pub fn parse_response(&self, packet: &[u8]) -> Result<SocketAddr> {
        if packet.len() < HEADER_SIZE {
            return Err(RealtimeError::webrtc("STUN packet too short"));
        }
        let mut header = &packet[..HEADER_SIZE];
        let msg_type = header.get_u16();
        let length = header.get_u16() as usize;
        let cookie = header.get_u32();

        if cookie != MAGIC_COOKIE {
            return Err(RealtimeError::webrtc("STUN magic cookie mismatch"));
        }
        if header[..] != self.transaction_id[..] {
            return Err(RealtimeError::webrtc("STUN transaction id mismatch"));
        }
        if msg_type != BINDING_SUCCESS {
            return Err(RealtimeError::webrtc(format!("STUN binding failed (type {msg_type:#06x})")));
        }
        if packet.len() < HEADER_SIZE + length {
            return Err(RealtimeError::webrtc("STUN attributes truncated"));
        }

        let mut attrs = &packet[HEADER_SIZE..HEADER_SIZE + length];
        let mut fallback = None;
        while attrs.remaining() >= 4 {
            let attr_type = attrs.get_u16();
            let attr_len = attrs.get_u16() as usize;
            if attrs.remaining() < attr_len {
                return Err(RealtimeError::webrtc("STUN attribute truncated"));
            }
            let value = &attrs[..attr_len];
            match attr_type {
                ATTR_XOR_MAPPED_ADDRESS => return self.decode_address(value, true),
                ATTR_MAPPED_ADDRESS => fallback = Some(self.decode_address(value, false)),
                _ => {}
            }
            let padded = (attr_len + 3) & !3;
            attrs.advance(padded.min(attrs.remaining()));
        }

        fallback.unwrap_or_else(|| Err(RealtimeError::webrtc("STUN response has no mapped address")))
    }

    fn decode_address(&self, mut value: &[u8], xor: bool) -> Result<SocketAddr> {
        if value.remaining() < 4 {
            return Err(RealtimeError::webrtc("STUN address attribute too short"));
        }
        value.advance(1);
        let family = value.get_u8();
        let mut port = value.get_u16();
        if xor {
            port ^= (MAGIC_COOKIE >> 16) as u16;
        }

        let ip = match family {
            0x01 if value.remaining() >= 4 => {
                let mut raw = value.get_u32();
                if xor {
                    raw ^= MAGIC_COOKIE;
                }
                IpAddr::from(raw.to_be_bytes())
            }
            0x02 if value.remaining() >= 16 => {
                let mut raw = [0u8; 16];
                value.copy_to_slice(&mut raw);
                if xor {
                    let mut mask = [0u8; 16];
                    mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                    mask[4..].copy_from_slice(&self.transaction_id);
                    for (b, m) in raw.iter_mut().zip(mask) {
                        *b ^= m;
                    }
                }
                IpAddr::from(raw)
            }
            other => {
                return Err(RealtimeError::webrtc(format!("unsupported STUN address family {other}")));
            }
        };

        Ok(SocketAddr::new(ip, port))
    }
}

impl Default for BindingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `stun:host[:port]` into host and port.
pub fn parse_stun_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("stun:")
        .ok_or_else(|| RealtimeError::config(format!("not a stun: URL: {url}")))?;
    if rest.is_empty() {
        return Err(RealtimeError::config(format!("missing STUN host: {url}")));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
            let port = port
                .parse()
                .map_err(|e| RealtimeError::config(format!("bad STUN port in {url}: {e}")))?;
            Ok((host.trim_matches(['[', ']']).to_string(), port))
        }
        _ => Ok((rest.trim_matches(['[', ']']).to_string(), DEFAULT_STUN_PORT)),
    }
}

/// Ask `server` (a `stun:` URL) for this socket's public address.
pub async fn probe(socket: &UdpSocket, server: &str, timeout: Duration) -> Result<SocketAddr> {
    let (host, port) = parse_stun_url(server)?;
    let target = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| RealtimeError::webrtc(format!("resolve {host}: {e}")))?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| RealtimeError::webrtc(format!("no IPv4 address for {host}")))?;

    let request = BindingRequest::new();
    socket
        .send_to(&request.encode(), target)
        .await
        .map_err(|e| RealtimeError::webrtc(format!("STUN send: {e}")))?;

    let mut buf = [0u8; 576];
    let exchange = async {
        loop {
            let (n, from) = socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| RealtimeError::webrtc(format!("STUN recv: {e}")))?;
            if from == target {
                return request.parse_response(&buf[..n]);
            }
        }
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| RealtimeError::webrtc(format!("STUN probe to {server} timed out")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(request: &BindingRequest, attr_type: u16, value: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(BINDING_SUCCESS);
        buf.put_u16((4 + value.len()) as u16);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&request.transaction_id);
        buf.put_u16(attr_type);
        buf.put_u16(value.len() as u16);
        buf.put_slice(value);
        buf.to_vec()
    }

    #[test]
    fn request_header_layout() {
        let request = BindingRequest::new();
        let wire = request.encode();
        assert_eq!(wire.len(), 20);
        assert_eq!(&wire[..2], &[0x00, 0x01]);
        assert_eq!(&wire[2..4], &[0, 0]);
        assert_eq!(&wire[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_eq!(&wire[8..], &request.transaction_id);
    }

    #[test]
    fn decodes_xor_mapped_ipv4() {
        let request = BindingRequest::new();
        let port = 54321u16 ^ (MAGIC_COOKIE >> 16) as u16;
        let ip = u32::from_be_bytes([203, 0, 113, 7]) ^ MAGIC_COOKIE;
        let mut value = vec![0, 0x01];
        value.extend_from_slice(&port.to_be_bytes());
        value.extend_from_slice(&ip.to_be_bytes());

        let addr = request.parse_response(&response(&request, ATTR_XOR_MAPPED_ADDRESS, &value)).unwrap();
        assert_eq!(addr, "203.0.113.7:54321".parse().unwrap());
    }

    #[test]
    fn decodes_xor_mapped_ipv6() {
        let request = BindingRequest { transaction_id: [7; 12] };
        let target: std::net::Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut mask = [0u8; 16];
        mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        mask[4..].copy_from_slice(&request.transaction_id);
        let xored: Vec<u8> = target.octets().iter().zip(mask).map(|(b, m)| b ^ m).collect();

        let mut value = vec![0, 0x02];
        value.extend_from_slice(&(3478u16 ^ 0x2112).to_be_bytes());
        value.extend_from_slice(&xored);

        let addr = request.parse_response(&response(&request, ATTR_XOR_MAPPED_ADDRESS, &value)).unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V6(target), 3478));
    }

    #[test]
    fn rejects_foreign_transaction() {
        let request = BindingRequest::new();
        let other = BindingRequest { transaction_id: [0xAA; 12] };
        let packet = response(&other, ATTR_MAPPED_ADDRESS, &[0, 1, 0, 80, 10, 0, 0, 1]);
        assert!(request.parse_response(&packet).is_err());
    }

    #[test]
    fn plain_mapped_address_fallback() {
        let request = BindingRequest::new();
        let packet = response(&request, ATTR_MAPPED_ADDRESS, &[0, 1, 0, 80, 10, 0, 0, 1]);
        assert_eq!(request.parse_response(&packet).unwrap(), "10.0.0.1:80".parse().unwrap());
    }

    #[test]
    fn stun_urls() {
        assert_eq!(
            parse_stun_url("stun:stun.l.google.com:19302").unwrap(),
            ("stun.l.google.com".to_string(), 19302)
        );
        assert_eq!(parse_stun_url("stun:example.org").unwrap(), ("example.org".to_string(), 3478));
        assert_eq!(parse_stun_url("stun:[::1]:5000").unwrap(), ("::1".to_string(), 5000));
        assert!(parse_stun_url("turn:example.org").is_err());
        assert!(parse_stun_url("stun:host:notaport").is_err());
    }
}
