//! OSC 1.0 message encoding and the UDP stream sink
//!
//! Messages are laid out as address, type-tag string and arguments. Strings
//! are NUL-terminated and padded to a multiple of four bytes; numbers are
//! big-endian.

use super::{SinkError, StreamSink};
use crate::types::TagValue;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::debug;

/// Single OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Float(f32),
    Int(i32),
    Long(i64),
    Str(String),
    Bool(bool),
}

impl OscArg {
    fn type_tag(&self) -> u8 {
        match self {
            OscArg::Float(_) => b'f',
            OscArg::Int(_) => b'i',
            OscArg::Long(_) => b'h',
            OscArg::Str(_) => b's',
            OscArg::Bool(true) => b'T',
            OscArg::Bool(false) => b'F',
        }
    }

    /// Numeric value, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Float(v) => Some(*v as f64),
            OscArg::Int(v) => Some(*v as f64),
            OscArg::Long(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<f64> for OscArg {
    fn from(v: f64) -> Self {
        OscArg::Float(v as f32)
    }
}

impl From<&TagValue> for OscArg {
    fn from(v: &TagValue) -> Self {
        match v {
            TagValue::Bool(b) => OscArg::Bool(*b),
            // int32 when it fits, int64 otherwise
            TagValue::Integer(i) => match i32::try_from(*i) {
                Ok(v) => OscArg::Int(v),
                Err(_) => OscArg::Long(*i),
            },
            TagValue::Float(f) => OscArg::Float(*f as f32),
            TagValue::Text(s) => OscArg::Str(s.clone()),
        }
    }
}

fn write_padded_str(buf: &mut Vec<u8>, s: &str) -> Result<(), SinkError> {
    if s.as_bytes().contains(&0) {
        return Err(SinkError::Encode(format!(
            "OSC strings cannot contain NUL: {:?}",
            s
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    Ok(())
}

/// Encode an OSC message
pub fn encode_message(address: &str, args: &[OscArg]) -> Result<Vec<u8>, SinkError> {
    if !address.starts_with('/') {
        return Err(SinkError::Encode(format!(
            "OSC address must start with '/': {}",
            address
        )));
    }

    let mut buf = Vec::with_capacity(address.len() + 8 + args.len() * 8);
    write_padded_str(&mut buf, address)?;

    let mut tags = String::with_capacity(args.len() + 1);
    tags.push(',');
    for arg in args {
        tags.push(arg.type_tag() as char);
    }
    write_padded_str(&mut buf, &tags)?;

    for arg in args {
        match arg {
            OscArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Str(s) => write_padded_str(&mut buf, s)?,
            OscArg::Bool(_) => {}
        }
    }

    Ok(buf)
}

/// Fire-and-forget OSC client over a single long-lived UDP socket
pub struct OscStreamSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscStreamSink {
    /// Resolve the destination once and bind a local socket for the process lifetime
    pub fn connect(host: &str, port: u16) -> Result<Self, SinkError> {
        let target = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SinkError::Transport(format!("Cannot resolve {}:{}", host, port)))?;

        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        debug!(%target, "OSC stream sink ready");

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl StreamSink for OscStreamSink {
    fn send(&mut self, address: &str, value: &OscArg) -> Result<(), SinkError> {
        let packet = encode_message(address, std::slice::from_ref(value))?;
        self.socket.send_to(&packet, self.target)?;
        Ok(())
    }
}
