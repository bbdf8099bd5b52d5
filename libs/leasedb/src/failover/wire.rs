//! Failover protocol message framing: a 4-byte length-prefixed header
//! followed by TLV-encoded options, matching the shape of the ISC failover
//! wire protocol. No peer state machine is attached -- encode/decode only.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    PoolReq = 1,
    PoolResp = 2,
    Connect = 3,
    ConnectAck = 4,
    UpdReq = 5,
    Update = 6,
    UpdReqAll = 7,
    UpdDone = 8,
    BndUpd = 9,
    BndAck = 10,
    Disconnect = 11,
    State = 12,
    Contact = 13,
}

impl MessageType {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::PoolReq,
            2 => Self::PoolResp,
            3 => Self::Connect,
            4 => Self::ConnectAck,
            5 => Self::UpdReq,
            6 => Self::Update,
            7 => Self::UpdReqAll,
            8 => Self::UpdDone,
            9 => Self::BndUpd,
            10 => Self::BndAck,
            11 => Self::Disconnect,
            12 => Self::State,
            13 => Self::Contact,
            _ => return None,
        })
    }
}

/// One TLV option in a failover message: a 2-byte code, 2-byte length,
/// value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Option_ {
    pub code: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub xid: u32,
    pub options: Vec<Option_>,
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(self.msg_type as u32).to_be_bytes());
        payload.extend_from_slice(&self.xid.to_be_bytes());
        for opt in &self.options {
            payload.extend_from_slice(&opt.code.to_be_bytes());
            payload.extend_from_slice(&(opt.value.len() as u16).to_be_bytes());
            payload.extend_from_slice(&opt.value);
        }
        let mut framed = Vec::with_capacity(payload.len() + 4);
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(&payload);
        framed
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::JournalParse("truncated failover frame length".into()));
        }
        let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
        let total = 4 + len;
        if buf.len() < total {
            return Err(Error::JournalParse("truncated failover frame body".into()));
        }
        let body = &buf[4..total];
        if body.len() < 8 {
            return Err(Error::JournalParse("truncated failover frame header".into()));
        }
        let msg_type = u32::from_be_bytes(body[0..4].try_into().unwrap());
        let msg_type = MessageType::from_u32(msg_type)
            .ok_or_else(|| Error::JournalParse(format!("unknown failover message type {msg_type}")))?;
        let xid = u32::from_be_bytes(body[4..8].try_into().unwrap());
        let mut options = Vec::new();
        let mut i = 8;
        while i + 4 <= body.len() {
            let code = u16::from_be_bytes(body[i..i + 2].try_into().unwrap());
            let olen = u16::from_be_bytes(body[i + 2..i + 4].try_into().unwrap()) as usize;
            let start = i + 4;
            let end = start + olen;
            if end > body.len() {
                return Err(Error::JournalParse("truncated failover option".into()));
            }
            options.push(Option_ {
                code,
                value: body[start..end].to_vec(),
            });
            i = end;
        }
        Ok((
            Message {
                msg_type,
                xid,
                options,
            },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_message_with_options() {
        let msg = Message {
            msg_type: MessageType::BndUpd,
            xid: 42,
            options: vec![
                Option_ {
                    code: 1,
                    value: vec![192, 0, 2, 10],
                },
                Option_ {
                    code: 2,
                    value: vec![],
                },
            ],
        };
        let bytes = msg.encode();
        let (decoded, consumed) = Message::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_truncated_frame() {
        let msg = Message {
            msg_type: MessageType::Connect,
            xid: 1,
            options: vec![],
        };
        let bytes = msg.encode();
        assert!(Message::decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
