//! Payload serialization: fixed field order per tag.
//!
//! Scalars are little-endian, strings are `u32` length-prefixed UTF-8,
//! string maps are `u32` count plus repeated key/value pairs. Each typed
//! payload struct encodes and decodes its fields in declaration order;
//! there is no self-describing envelope, the tag determines the layout.

use std::collections::BTreeMap;

use crate::error::{ErrorKind, JobError, WireError};

/// Sequential payload writer.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    pub fn put_map(&mut self, map: &BTreeMap<String, String>) {
        self.put_u32(map.len() as u32);
        for (k, v) in map {
            self.put_str(k);
            self.put_str(v);
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential payload reader over a received frame payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.data.len() {
            return Err(WireError::Truncated(what));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self, what: &'static str) -> Result<u8, WireError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn get_bool(&mut self, what: &'static str) -> Result<bool, WireError> {
        Ok(self.get_u8(what)? != 0)
    }

    pub fn get_u16(&mut self, what: &'static str) -> Result<u16, WireError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self, what: &'static str) -> Result<i32, WireError> {
        let b = self.take(4, what)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self, what: &'static str) -> Result<u64, WireError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn get_i64(&mut self, what: &'static str) -> Result<i64, WireError> {
        let b = self.take(8, what)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn get_str(&mut self, what: &'static str) -> Result<String, WireError> {
        let len = self.get_u32(what)? as usize;
        let b = self.take(len, what)?;
        String::from_utf8(b.to_vec()).map_err(|_| WireError::BadUtf8)
    }

    pub fn get_bytes(&mut self, what: &'static str) -> Result<Vec<u8>, WireError> {
        let len = self.get_u32(what)? as usize;
        Ok(self.take(len, what)?.to_vec())
    }

    pub fn get_map(&mut self, what: &'static str) -> Result<BTreeMap<String, String>, WireError> {
        let count = self.get_u32(what)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let k = self.get_str(what)?;
            let v = self.get_str(what)?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Bytes left after the last field; zero for a well-formed payload.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Worker identity for `Command::SetHost`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostArgs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl HostArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.host);
        w.put_u16(self.port);
        w.put_str(&self.user);
        w.put_str(&self.password);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            host: r.get_str("host")?,
            port: r.get_u16("port")?,
            user: r.get_str("user")?,
            password: r.get_str("password")?,
        })
    }
}

/// Single-URL commands: Stat, ListDir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlArgs {
    pub url: String,
}

impl UrlArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetArgs {
    pub url: String,
    /// Byte offset to start from; non-zero when feeding a resumed upload.
    pub offset: u64,
}

impl GetArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_u64(self.offset);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            offset: r.get_u64("offset")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutArgs {
    pub url: String,
    pub overwrite: bool,
    pub resume: bool,
    /// Requested permissions, -1 for protocol default.
    pub permissions: i32,
}

impl PutArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_bool(self.overwrite);
        w.put_bool(self.resume);
        w.put_i32(self.permissions);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            overwrite: r.get_bool("overwrite")?,
            resume: r.get_bool("resume")?,
            permissions: r.get_i32("permissions")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkdirArgs {
    pub url: String,
    pub permissions: i32,
}

impl MkdirArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_i32(self.permissions);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            permissions: r.get_i32("permissions")?,
        })
    }
}

/// Two-URL commands: Rename and Symlink (src is the link target there).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameArgs {
    pub src: String,
    pub dst: String,
    pub overwrite: bool,
}

impl RenameArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.src);
        w.put_str(&self.dst);
        w.put_bool(self.overwrite);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            src: r.get_str("src")?,
            dst: r.get_str("dst")?,
            overwrite: r.get_bool("overwrite")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyArgs {
    pub src: String,
    pub dst: String,
    pub permissions: i32,
    pub overwrite: bool,
}

impl CopyArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.src);
        w.put_str(&self.dst);
        w.put_i32(self.permissions);
        w.put_bool(self.overwrite);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            src: r.get_str("src")?,
            dst: r.get_str("dst")?,
            permissions: r.get_i32("permissions")?,
            overwrite: r.get_bool("overwrite")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelArgs {
    pub url: String,
    pub is_file: bool,
}

impl DelArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_bool(self.is_file);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            is_file: r.get_bool("is_file")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChmodArgs {
    pub url: String,
    pub permissions: i32,
}

impl ChmodArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_i32(self.permissions);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            permissions: r.get_i32("permissions")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChownArgs {
    pub url: String,
    pub owner: String,
    pub group: String,
}

impl ChownArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_str(&self.owner);
        w.put_str(&self.group);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            owner: r.get_str("owner")?,
            group: r.get_str("group")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetModificationTimeArgs {
    pub url: String,
    pub mtime_secs: i64,
}

impl SetModificationTimeArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_i64(self.mtime_secs);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            mtime_secs: r.get_i64("mtime")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialArgs {
    pub url: String,
    pub data: Vec<u8>,
}

impl SpecialArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_bytes(&self.data);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("url")?,
            data: r.get_bytes("data")?,
        })
    }
}

/// `Msg::Error` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub code: u32,
    pub text: String,
    pub operand: String,
}

impl ErrorMsg {
    pub fn from_job_error(err: &JobError) -> Self {
        let text = match &err.kind {
            ErrorKind::Internal(t) => t.clone(),
            other => other.to_string(),
        };
        Self {
            code: err.kind.code(),
            text,
            operand: err.operand.clone(),
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(ErrorKind::from_code(self.code, &self.text), self.operand.clone())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_u32(self.code);
        w.put_str(&self.text);
        w.put_str(&self.operand);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            code: r.get_u32("code")?,
            text: r.get_str("text")?,
            operand: r.get_str("operand")?,
        })
    }
}

/// Kind of an interactive prompt carried by `Msg::MessageBox`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageBoxKind {
    Information = 1,
    YesNo = 2,
    YesNoCancel = 3,
    OkCancel = 4,
    /// Credentials request; `data` carries an encoded [`crate::AuthInfo`].
    AuthPrompt = 5,
    /// Resume-or-restart choice for a partial destination.
    Resume = 6,
}

impl MessageBoxKind {
    pub fn from_wire(v: u32) -> Result<Self, WireError> {
        Ok(match v {
            1 => MessageBoxKind::Information,
            2 => MessageBoxKind::YesNo,
            3 => MessageBoxKind::YesNoCancel,
            4 => MessageBoxKind::OkCancel,
            5 => MessageBoxKind::AuthPrompt,
            6 => MessageBoxKind::Resume,
            _ => return Err(WireError::BadValue("message box kind")),
        })
    }
}

/// Answer codes for message boxes (also used on the wire).
pub const ANSWER_OK: i32 = 1;
pub const ANSWER_CANCEL: i32 = 2;
pub const ANSWER_YES: i32 = 3;
pub const ANSWER_NO: i32 = 4;

/// `Msg::MessageBox` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBoxMsg {
    pub kind: MessageBoxKind,
    pub title: String,
    pub text: String,
    /// Extra, kind-specific payload (e.g. encoded AuthInfo).
    pub data: Vec<u8>,
}

impl MessageBoxMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_u32(self.kind as u32);
        w.put_str(&self.title);
        w.put_str(&self.text);
        w.put_bytes(&self.data);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            kind: MessageBoxKind::from_wire(r.get_u32("kind")?)?,
            title: r.get_str("title")?,
            text: r.get_str("text")?,
            data: r.get_bytes("data")?,
        })
    }
}

/// `Command::MessageBoxAnswer` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBoxAnswer {
    pub result: i32,
    /// Kind-specific payload (e.g. filled AuthInfo on ANSWER_OK).
    pub data: Vec<u8>,
}

impl MessageBoxAnswer {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_i32(self.result);
        w.put_bytes(&self.data);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            result: r.get_i32("result")?,
            data: r.get_bytes("data")?,
        })
    }
}

/// Helpers for payloads that are a single scalar or string.
pub fn encode_u64(v: u64) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.put_u64(v);
    w.into_vec()
}

pub fn decode_u64(payload: &[u8], what: &'static str) -> Result<u64, WireError> {
    PayloadReader::new(payload).get_u64(what)
}

pub fn encode_str(s: &str) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.put_str(s);
    w.into_vec()
}

pub fn decode_str(payload: &[u8], what: &'static str) -> Result<String, WireError> {
    PayloadReader::new(payload).get_str(what)
}

pub fn encode_map(map: &BTreeMap<String, String>) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.put_map(map);
    w.into_vec()
}

pub fn decode_map(payload: &[u8]) -> Result<BTreeMap<String, String>, WireError> {
    PayloadReader::new(payload).get_map("map")
}
