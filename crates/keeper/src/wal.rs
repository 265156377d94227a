use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};

use squalldb_common::KeeperError;
use squalldb_protocol::Request;

pub(crate) const WAL_MAGIC: [u8; 4] = *b"SQWL";
pub(crate) const WAL_VERSION: u8 = 1;

/// Limite de sanidade para um registro; um comprimento acima disso indica
/// corrupção, não um request legítimo.
const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Encoda o cabeçalho de um segmento recém-criado.
pub(crate) fn encode_header(dst: &mut BytesMut) {
    dst.put_slice(&WAL_MAGIC);
    dst.put_u8(WAL_VERSION);
}

/// Encoda um request como registro de WAL: corpo com prefixo de tamanho
/// contendo id, timestamp, flag, comando, argumentos e meta.
pub(crate) fn encode_request(req: &Request, dst: &mut BytesMut) {
    let mut body = BytesMut::with_capacity(64);
    body.put_u64(req.id);
    body.put_u64(unix_ms(req.timestamp));
    body.put_u8(req.unreliable as u8);

    body.put_u16(req.cmd.len() as u16);
    body.put_slice(req.cmd.as_bytes());

    body.put_u32(req.args.len() as u32);
    for arg in &req.args {
        body.put_u32(arg.len() as u32);
        body.put_slice(arg);
    }

    body.put_u16(req.meta.len() as u16);
    for (key, value) in &req.meta {
        body.put_u16(key.len() as u16);
        body.put_slice(key.as_bytes());
        body.put_u16(value.len() as u16);
        body.put_slice(value.as_bytes());
    }

    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
}

/// Cursor de decodificação sobre um segmento de WAL em memória.
///
/// Um registro truncado no FINAL do segmento (queda no meio do append)
/// vira `TruncatedRecord`, que o replay tolera; qualquer outra falha de
/// decodificação é corrupção e aborta a recuperação.
pub(crate) struct WalCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WalCursor<'a> {
    pub(crate) fn new(data: &'a [u8], path: &Path) -> Result<WalCursor<'a>, KeeperError> {
        if data.len() < WAL_MAGIC.len() + 1 || data[..4] != WAL_MAGIC {
            return Err(KeeperError::BadWalMagic(path.to_path_buf()));
        }
        let version = data[4];
        if version != WAL_VERSION {
            return Err(KeeperError::UnsupportedWalVersion(version));
        }
        Ok(WalCursor { data, pos: 5 })
    }

    pub(crate) fn next_request(&mut self) -> Result<Option<Request>, KeeperError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.data.len() - self.pos < 4 {
            return Err(KeeperError::TruncatedRecord);
        }

        let len = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap_or([0; 4]))
            as usize;
        if len > MAX_RECORD_SIZE {
            return Err(KeeperError::CorruptRecord(format!(
                "registro de {len} bytes excede o limite"
            )));
        }
        if self.data.len() - self.pos - 4 < len {
            return Err(KeeperError::TruncatedRecord);
        }

        let body = &self.data[self.pos + 4..self.pos + 4 + len];
        let request = decode_body(body)?;
        self.pos += 4 + len;
        Ok(Some(request))
    }
}

/// Leitor posicional sobre o corpo de um registro; qualquer leitura além
/// do fim é corrupção (o tamanho do corpo já foi conferido).
struct BodyReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], KeeperError> {
        if self.body.len() - self.pos < n {
            return Err(KeeperError::CorruptRecord(
                "corpo do registro menor que o declarado".into(),
            ));
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, KeeperError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, KeeperError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, KeeperError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, KeeperError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_be_bytes(buf))
    }

    fn string(&mut self, len: usize) -> Result<String, KeeperError> {
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|e| KeeperError::CorruptRecord(format!("string não-UTF8: {e}")))
    }
}

fn decode_body(body: &[u8]) -> Result<Request, KeeperError> {
    let mut r = BodyReader { body, pos: 0 };

    let id = r.u64()?;
    let timestamp = SystemTime::UNIX_EPOCH + Duration::from_millis(r.u64()?);
    let unreliable = r.u8()? != 0;

    let cmd_len = r.u16()? as usize;
    let cmd = r.string(cmd_len)?;

    let argc = r.u32()? as usize;
    let mut args = Vec::with_capacity(argc.min(1024));
    for _ in 0..argc {
        let len = r.u32()? as usize;
        args.push(Bytes::copy_from_slice(r.take(len)?));
    }

    let meta_count = r.u16()? as usize;
    let mut meta = HashMap::with_capacity(meta_count);
    for _ in 0..meta_count {
        let key_len = r.u16()? as usize;
        let key = r.string(key_len)?;
        let value_len = r.u16()? as usize;
        meta.insert(key, r.string(value_len)?);
    }

    Ok(Request {
        id,
        cmd,
        args,
        timestamp,
        unreliable,
        meta,
    })
}

fn unix_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
