// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Minimal OBEX packet framing.
//!
//! Packet format: `[opcode:1][length:2 BE][fields...][headers...]`, where
//! the length covers the whole packet. CONNECT carries four extra fields
//! (version, flags, max packet length) before its headers, SETPATH two.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const OP_CONNECT: u8 = 0x80;
pub const OP_DISCONNECT: u8 = 0x81;
pub const OP_SETPATH: u8 = 0x85;
pub const OP_ABORT: u8 = 0xFF;

pub const RSP_SUCCESS: u8 = 0xA0;
pub const RSP_BAD_REQUEST: u8 = 0xC0;
pub const RSP_UNAUTHORIZED: u8 = 0xC1;
pub const RSP_NOT_IMPLEMENTED: u8 = 0xD1;
pub const RSP_SERVICE_UNAVAILABLE: u8 = 0xD3;

pub const HI_TARGET: u8 = 0x46;
pub const HI_WHO: u8 = 0x4A;
pub const HI_CONNECTION_ID: u8 = 0xCB;
pub const HI_AUTH_CHALLENGE: u8 = 0x4D;

pub const OBEX_VERSION: u8 = 0x10;
pub const MAX_PACKET_LEN: u16 = 0xFFFE;
const MIN_PACKET_LEN: u16 = 3;

/// PBAP target UUID sent in the CONNECT Target header.
pub const PBAP_TARGET: [u8; 16] = [
    0x79, 0x61, 0x35, 0xf0, 0xf0, 0xc5, 0x11, 0xd8, 0x09, 0x66, 0x08, 0x00, 0x20, 0x0c, 0x9a, 0x66,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated")]
    Truncated,
    #[error("invalid packet length {0}")]
    BadLength(u16),
    #[error("invalid length {len} for header {id:#04x}")]
    BadHeader { id: u8, len: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Null-terminated UTF-16BE text, kept raw.
    Unicode(Vec<u8>),
    Bytes(Vec<u8>),
    U8(u8),
    U32(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: u8,
    pub value: HeaderValue,
}

impl Header {
    pub fn bytes(id: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            value: HeaderValue::Bytes(data.into()),
        }
    }

    pub fn u32(id: u8, value: u32) -> Self {
        Self {
            id,
            value: HeaderValue::U32(value),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.id);
        match &self.value {
            HeaderValue::Unicode(data) | HeaderValue::Bytes(data) => {
                out.extend_from_slice(&((data.len() + 3) as u16).to_be_bytes());
                out.extend_from_slice(data);
            }
            HeaderValue::U8(v) => out.push(*v),
            HeaderValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

fn parse_headers(mut data: &[u8]) -> Result<Vec<Header>, PacketError> {
    let mut headers = Vec::new();
    while let Some(&id) = data.first() {
        // The top two bits of the id select the encoding.
        let (value, used) = match id >> 6 {
            0 | 1 => {
                if data.len() < 3 {
                    return Err(PacketError::Truncated);
                }
                let len = u16::from_be_bytes([data[1], data[2]]);
                if len < 3 {
                    return Err(PacketError::BadHeader { id, len });
                }
                if data.len() < len as usize {
                    return Err(PacketError::Truncated);
                }
                let body = data[3..len as usize].to_vec();
                let value = if id >> 6 == 0 {
                    HeaderValue::Unicode(body)
                } else {
                    HeaderValue::Bytes(body)
                };
                (value, len as usize)
            }
            2 => {
                if data.len() < 2 {
                    return Err(PacketError::Truncated);
                }
                (HeaderValue::U8(data[1]), 2)
            }
            _ => {
                if data.len() < 5 {
                    return Err(PacketError::Truncated);
                }
                let v = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
                (HeaderValue::U32(v), 5)
            }
        };
        headers.push(Header { id, value });
        data = &data[used..];
    }
    Ok(headers)
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: u8,
    /// Peer's maximum packet length, CONNECT only.
    pub max_packet_len: Option<u16>,
    pub headers: Vec<Header>,
}

impl Request {
    pub fn parse(packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() < MIN_PACKET_LEN as usize {
            return Err(PacketError::Truncated);
        }
        let opcode = packet[0];
        let len = u16::from_be_bytes([packet[1], packet[2]]);
        if len < MIN_PACKET_LEN || len as usize != packet.len() {
            return Err(PacketError::BadLength(len));
        }

        let mut max_packet_len = None;
        let body = match opcode {
            OP_CONNECT => {
                if packet.len() < 7 {
                    return Err(PacketError::Truncated);
                }
                max_packet_len = Some(u16::from_be_bytes([packet[5], packet[6]]));
                &packet[7..]
            }
            OP_SETPATH => {
                if packet.len() < 5 {
                    return Err(PacketError::Truncated);
                }
                &packet[5..]
            }
            _ => &packet[3..],
        };

        Ok(Self {
            opcode,
            max_packet_len,
            headers: parse_headers(body)?,
        })
    }

    pub fn header(&self, id: u8) -> Option<&HeaderValue> {
        self.headers.iter().find(|h| h.id == id).map(|h| &h.value)
    }

    pub fn has_header(&self, id: u8) -> bool {
        self.header(id).is_some()
    }
}

/// A server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u8,
    fields: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Response {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            fields: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Response to CONNECT, carrying our version and packet limit.
    pub fn connect(code: u8) -> Self {
        let mut fields = vec![OBEX_VERSION, 0x00];
        fields.extend_from_slice(&MAX_PACKET_LEN.to_be_bytes());
        Self {
            code,
            fields,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.code, 0, 0];
        out.extend_from_slice(&self.fields);
        for header in &self.headers {
            header.encode(&mut out);
        }
        let len = (out.len() as u16).to_be_bytes();
        out[1] = len[0];
        out[2] = len[1];
        out
    }
}

/// Read one whole packet. Returns `None` on a clean EOF between packets.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 3];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u16::from_be_bytes([prefix[1], prefix[2]]);
    if len < MIN_PACKET_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            PacketError::BadLength(len),
        ));
    }

    let mut packet = vec![0u8; len as usize];
    packet[..3].copy_from_slice(&prefix);
    reader.read_exact(&mut packet[3..]).await?;
    Ok(Some(packet))
}
