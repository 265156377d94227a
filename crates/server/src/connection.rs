use bytes::{Bytes, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use squalldb_common::{ConnectionError, ProtocolError, READ_BUFFER_CAPACITY};
use squalldb_protocol::Frame;

/// Wrapper sobre TcpStream com buffer para leitura/escrita de frames RESP.
/// Além de arrays RESP, aceita comandos inline (linha terminada em CRLF).
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Lê um frame completo do stream. Retorna None no EOF.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::TruncatedStream);
            }
        }
    }

    /// Extrai mais um frame já bufferizado, sem tocar o socket. Requests
    /// adicionais completos no buffer caracterizam um pipeline.
    pub fn try_read_buffered(&mut self) -> Result<Option<Frame>, ConnectionError> {
        self.parse_frame()
    }

    /// Escreve um frame no stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        // linha que não começa com byte de tipo RESP: comando inline
        if !matches!(self.buffer[0], b'+' | b'-' | b':' | b'$' | b'*') {
            return self.parse_inline();
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor).map_err(ConnectionError::BadFrame)?;
                self.buffer = self.buffer.split_off(len);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(ConnectionError::BadFrame(e)),
        }
    }

    fn parse_inline(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let Some(end) = find_crlf(&self.buffer) else {
            return Ok(None); // linha ainda incompleta
        };

        let line = self.buffer.split_to(end + 2);
        let line = std::str::from_utf8(&line[..end]).map_err(|e| {
            ConnectionError::BadFrame(ProtocolError::Malformed(format!(
                "comando inline não-UTF8: {e}"
            )))
        })?;

        let parts: Vec<Frame> = line
            .split_ascii_whitespace()
            .map(|token| Frame::Bulk(Bytes::copy_from_slice(token.as_bytes())))
            .collect();

        if parts.is_empty() {
            // linha em branco; tenta o que vier depois
            return self.parse_frame();
        }
        Ok(Some(Frame::Array(parts)))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}
