use bytes::{Buf, BufMut, BytesMut};

/// Largest bulk string a client may send.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Largest element count of a request array.
const MAX_ARRAY_LEN: usize = 1024 * 1024;
/// Inline requests longer than this without a line break are rejected.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string `$-1`.
    BulkString(Option<Vec<u8>>),
    /// `None` is the null array `*-1`.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    pub fn write_to<B: BufMut>(&self, out: &mut B) {
        fn header<B: BufMut>(out: &mut B, tag: u8, n: impl ToString) {
            out.put_u8(tag);
            out.put_slice(n.to_string().as_bytes());
            out.put_slice(b"\r\n");
        }

        match self {
            RespValue::SimpleString(s) => header(out, b'+', s),
            RespValue::Error(s) => header(out, b'-', s),
            RespValue::Integer(n) => header(out, b':', n),
            RespValue::BulkString(None) => out.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                header(out, b'$', data.len());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            RespValue::Array(None) => out.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                header(out, b'*', items.len());
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    /// Flatten a request into its argument vector. Requests must be arrays
    /// of strings; anything else is a protocol error.
    pub fn into_argv(self) -> Result<Vec<Vec<u8>>, RespError> {
        let RespValue::Array(Some(items)) = self else {
            return Err(RespError::InvalidData("expected an array of bulk strings".into()));
        };
        items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(Some(data)) => Ok(data),
                RespValue::SimpleString(s) => Ok(s.into_bytes()),
                RespValue::Integer(n) => Ok(n.to_string().into_bytes()),
                _ => Err(RespError::InvalidData("expected an array of bulk strings".into())),
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("unexpected type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("{0}")]
    InvalidData(String),
}

/// Incremental RESP2 request parser.
///
/// `parse` consumes one complete value from the front of the buffer, or
/// leaves the buffer untouched and returns `Ok(None)` when the value is not
/// complete yet. Lines that do not start with a type byte are inline
/// commands and come back as an array of bulk strings.
pub struct RespParser;

impl RespParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let mut cursor = Cursor { data: &buf[..], pos: 0 };
        let value = match first {
            b'+' | b'-' | b':' | b'$' | b'*' => cursor.value()?,
            _ => cursor.inline()?,
        };
        let consumed = cursor.pos;
        if value.is_some() {
            buf.advance(consumed);
        }
        Ok(value)
    }
}

/// Read position over a borrowed buffer. Every method returns `Ok(None)` when
/// the input ends before the value does.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// The bytes up to the next CRLF, which is consumed too.
    fn line(&mut self) -> Option<&'a [u8]> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        self.pos += end + 2;
        Some(&rest[..end])
    }

    fn length(&mut self, what: &str) -> Result<Option<i64>, RespError> {
        let Some(line) = self.line() else {
            return Ok(None);
        };
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Some)
            .ok_or_else(|| RespError::InvalidData(format!("invalid {what} length")))
    }

    fn value(&mut self) -> Result<Option<RespValue>, RespError> {
        let Some(&tag) = self.data.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        match tag {
            b'+' => Ok(self.line().map(|l| RespValue::SimpleString(String::from_utf8_lossy(l).into_owned()))),
            b'-' => Ok(self.line().map(|l| RespValue::Error(String::from_utf8_lossy(l).into_owned()))),
            b':' => {
                let Some(line) = self.line() else {
                    return Ok(None);
                };
                let n = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RespError::InvalidData("invalid integer".into()))?;
                Ok(Some(RespValue::Integer(n)))
            }
            b'$' => self.bulk(),
            b'*' => self.array(),
            other => Err(RespError::InvalidByte(other)),
        }
    }

    fn bulk(&mut self) -> Result<Option<RespValue>, RespError> {
        let Some(len) = self.length("bulk")? else {
            return Ok(None);
        };
        if len == -1 {
            return Ok(Some(RespValue::BulkString(None)));
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|n| *n <= MAX_BULK_LEN)
            .ok_or_else(|| RespError::InvalidData("invalid bulk length".into()))?;
        let end = self.pos + len;
        if self.data.len() < end + 2 {
            return Ok(None);
        }
        if &self.data[end..end + 2] != b"\r\n" {
            return Err(RespError::InvalidData("bulk string not terminated by CRLF".into()));
        }
        let data = self.data[self.pos..end].to_vec();
        self.pos = end + 2;
        Ok(Some(RespValue::BulkString(Some(data))))
    }

    fn array(&mut self) -> Result<Option<RespValue>, RespError> {
        let Some(len) = self.length("multibulk")? else {
            return Ok(None);
        };
        if len < 0 {
            return Ok(Some(RespValue::Array(None)));
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|n| *n <= MAX_ARRAY_LEN)
            .ok_or_else(|| RespError::InvalidData("invalid multibulk length".into()))?;
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            match self.value()? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(RespValue::Array(Some(items))))
    }

    fn inline(&mut self) -> Result<Option<RespValue>, RespError> {
        let Some(line) = self.line() else {
            if self.data.len() > MAX_INLINE_LEN {
                return Err(RespError::InvalidData("too big inline request".into()));
            }
            return Ok(None);
        };
        let items = split_inline(line)?
            .into_iter()
            .map(|arg| RespValue::BulkString(Some(arg)))
            .collect();
        Ok(Some(RespValue::Array(Some(items))))
    }
}

/// Tokenize an inline request. Double quotes allow `\n`, `\r`, `\t`, `\xHH`
/// and escaped characters; single quotes take their contents verbatim.
fn split_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, RespError> {
    let unbalanced = || RespError::InvalidData("unbalanced quotes in request".into());
    let mut args = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if line[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let mut arg = Vec::new();
        while i < line.len() && !line[i].is_ascii_whitespace() {
            match line[i] {
                b'"' => {
                    i += 1;
                    loop {
                        let &c = line.get(i).ok_or_else(unbalanced)?;
                        i += 1;
                        match c {
                            b'"' => break,
                            b'\\' => {
                                let &e = line.get(i).ok_or_else(unbalanced)?;
                                i += 1;
                                match e {
                                    b'n' => arg.push(b'\n'),
                                    b'r' => arg.push(b'\r'),
                                    b't' => arg.push(b'\t'),
                                    b'x' => {
                                        let hex = line
                                            .get(i..i + 2)
                                            .and_then(|h| std::str::from_utf8(h).ok())
                                            .and_then(|h| u8::from_str_radix(h, 16).ok());
                                        match hex {
                                            Some(b) => {
                                                arg.push(b);
                                                i += 2;
                                            }
                                            None => arg.push(b'x'),
                                        }
                                    }
                                    other => arg.push(other),
                                }
                            }
                            other => arg.push(other),
                        }
                    }
                }
                b'\'' => {
                    i += 1;
                    let len = line[i..].iter().position(|c| *c == b'\'').ok_or_else(unbalanced)?;
                    arg.extend_from_slice(&line[i..i + len]);
                    i += len + 1;
                }
                c => {
                    arg.push(c);
                    i += 1;
                }
            }
        }
        args.push(arg);
    }
    Ok(args)
}
