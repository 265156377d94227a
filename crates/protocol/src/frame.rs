use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

use squalldb_common::{MAX_FRAME_SIZE, ProtocolError};

/// Representação de um frame RESP2.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Verifica se um frame completo está disponível no buffer, sem alocar.
    /// Retorna Err(Incomplete) se ainda faltam bytes.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        match next_byte(src)? {
            b'+' | b'-' | b':' => {
                take_line(src)?;
                Ok(())
            }
            b'$' => match take_decimal(src)? {
                -1 => Ok(()),
                len if len < 0 => Err(ProtocolError::BadLength(len)),
                len if len as usize > MAX_FRAME_SIZE => Err(ProtocolError::OversizedFrame {
                    len: len as usize,
                    max: MAX_FRAME_SIZE,
                }),
                len => advance(src, len as usize + 2), // payload + \r\n
            },
            b'*' => match take_decimal(src)? {
                -1 => Ok(()),
                count if count < 0 => Err(ProtocolError::BadLength(count)),
                count => {
                    for _ in 0..count {
                        Frame::check(src)?;
                    }
                    Ok(())
                }
            },
            byte => Err(ProtocolError::BadTypeByte(byte)),
        }
    }

    /// Faz o parse de um frame a partir do cursor.
    /// Assume que `check()` já validou a completude.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
        match next_byte(src)? {
            b'+' => Ok(Frame::Simple(take_utf8_line(src)?)),
            b'-' => Ok(Frame::Error(take_utf8_line(src)?)),
            b':' => Ok(Frame::Integer(take_decimal(src)?)),
            b'$' => {
                let len = take_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = len as usize;
                if src.remaining() < len + 2 {
                    return Err(ProtocolError::Incomplete);
                }
                let start = src.position() as usize;
                let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
                src.set_position((start + len + 2) as u64);
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let count = take_decimal(src)?;
                if count == -1 {
                    return Ok(Frame::Null);
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(items))
            }
            byte => Err(ProtocolError::BadTypeByte(byte)),
        }
    }

    /// Encoda o frame no buffer de saída em formato RESP2.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Frame::Error(s) => put_line(dst, b'-', s.as_bytes()),
            Frame::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                put_line(dst, b'$', data.len().to_string().as_bytes());
                dst.put(data.as_ref());
                dst.put(&b"\r\n"[..]);
            }
            Frame::Null => dst.put(&b"$-1\r\n"[..]),
            Frame::Array(items) => {
                put_line(dst, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Helper: cria um Frame::Bulk a partir de &str.
    pub fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Helper: cria um Array de Bulk strings (formato de comando RESP).
    pub fn command(parts: &[&str]) -> Frame {
        Frame::Array(parts.iter().map(|p| Frame::bulk(p)).collect())
    }
}

fn next_byte(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

fn advance(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::Incomplete);
    }
    src.set_position(src.position() + n as u64);
    Ok(())
}

/// Consome uma linha terminada em CRLF, retornando o conteúdo sem o terminador.
fn take_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = src.position() as usize;
    let haystack = *src.get_ref();

    let mut i = start;
    while i + 1 < haystack.len() {
        if haystack[i] == b'\r' && haystack[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&haystack[start..i]);
        }
        i += 1;
    }

    Err(ProtocolError::Incomplete)
}

fn take_utf8_line(src: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let line = take_line(src)?;
    String::from_utf8(line.to_vec())
        .map_err(|e| ProtocolError::Malformed(format!("linha não-UTF8: {e}")))
}

fn take_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = take_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ProtocolError::Malformed(format!(
                "esperado inteiro, veio {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn put_line(dst: &mut BytesMut, marker: u8, body: &[u8]) {
    dst.put_u8(marker);
    dst.put(body);
    dst.put(&b"\r\n"[..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let bytes = buf.freeze();
        let mut cursor = Cursor::new(bytes.as_ref());
        Frame::check(&mut cursor).unwrap();
        cursor.set_position(0);
        let parsed = Frame::parse(&mut cursor).unwrap();
        assert_eq!(&parsed, frame);
    }

    #[test]
    fn roundtrip_simple_string() {
        roundtrip(&Frame::Simple("OK".into()));
        roundtrip(&Frame::Simple("PONG".into()));
    }

    #[test]
    fn roundtrip_error() {
        roundtrip(&Frame::Error("ERR unknown command".into()));
    }

    #[test]
    fn roundtrip_integer() {
        roundtrip(&Frame::Integer(42));
        roundtrip(&Frame::Integer(-2));
        roundtrip(&Frame::Integer(0));
    }

    #[test]
    fn roundtrip_bulk() {
        roundtrip(&Frame::Bulk(Bytes::from("hello world")));
        roundtrip(&Frame::Bulk(Bytes::new()));
    }

    #[test]
    fn roundtrip_null() {
        roundtrip(&Frame::Null);
    }

    #[test]
    fn roundtrip_array() {
        roundtrip(&Frame::Array(vec![
            Frame::Simple("OK".into()),
            Frame::Integer(7),
            Frame::Bulk(Bytes::from("payload")),
            Frame::Null,
        ]));
    }

    #[test]
    fn roundtrip_nested_array() {
        roundtrip(&Frame::Array(vec![
            Frame::Array(vec![Frame::Integer(1), Frame::Integer(2)]),
            Frame::Bulk(Bytes::from("tail")),
        ]));
    }

    #[test]
    fn roundtrip_command() {
        roundtrip(&Frame::command(&["SETEX", "key", "10", "value"]));
    }

    #[test]
    fn incomplete_simple() {
        let data = b"+OK\r"; // falta o \n
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn incomplete_bulk() {
        let data = b"$5\r\nhel";
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn invalid_type_byte() {
        let data = b"?x\r\n";
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(ProtocolError::BadTypeByte(b'?'))
        ));
    }

    #[test]
    fn negative_bulk_length_rejected() {
        let data = b"$-7\r\n";
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(ProtocolError::BadLength(-7))
        ));
    }

    #[test]
    fn non_numeric_length_is_malformed() {
        let data = b"$abc\r\n";
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn null_bulk_parses_to_null() {
        let data = b"$-1\r\n";
        let mut cursor = Cursor::new(&data[..]);
        Frame::check(&mut cursor).unwrap();
        cursor.set_position(0);
        assert_eq!(Frame::parse(&mut cursor).unwrap(), Frame::Null);
    }

    #[test]
    fn encode_bulk_binary_safe() {
        let payload = Bytes::from_static(&[0, 1, 2, b'\r', b'\n', 255]);
        roundtrip(&Frame::Bulk(payload));
    }
}
