use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::RwLock;

use squalldb_common::{MAX_FRAME_SIZE, SnapshotError};

use crate::item::{Item, ItemKind, Value};

/// Número de partições do engine. Potência de dois.
pub const SHARD_COUNT: usize = 32;

const SNAPSHOT_MAGIC: [u8; 4] = *b"SQDB";
const SNAPSHOT_VERSION: u8 = 1;
/// Sentinela de fim de stream no lugar de um key_len.
const END_OF_STREAM: u32 = u32::MAX;

type Shard = HashMap<String, Arc<Item>>;

/// Engine de armazenamento: mapa chave→Item particionado por hash.
///
/// Cada shard tem seu próprio RwLock; operações multi-shard visitam os
/// shards em ordem ascendente de índice e são atômicas por shard, não
/// globalmente. O engine não consulta expiração: itens vencidos são
/// filtrados pelo Core e removidos pelo coletor.
pub struct StorageHash {
    shards: Vec<RwLock<Shard>>,
}

impl StorageHash {
    pub fn new() -> StorageHash {
        StorageHash {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(Shard::new())).collect(),
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize & (SHARD_COUNT - 1)
    }

    /// Retorna o Item armazenado, sem consultar expiração.
    pub fn get(&self, key: &str) -> Option<Arc<Item>> {
        self.shards[self.shard_index(key)].read().get(key).cloned()
    }

    /// Snapshot das chaves presentes. Inserções/remoções concorrentes
    /// podem ou não aparecer.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        for shard in &self.shards {
            keys.extend(shard.read().keys().cloned());
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Instala `item` em `key`, descartando qualquer Item anterior.
    pub fn add_or_replace_one(&self, key: String, item: Arc<Item>) {
        self.shards[self.shard_index(&key)].write().insert(key, item);
    }

    /// Retorna o Item vivo em `key`, ou instala e retorna um novo criado
    /// por `make` se a chave está ausente ou vencida. Atômico no shard:
    /// dois criadores concorrentes recebem o mesmo Arc.
    pub fn get_live_or_insert(&self, key: &str, make: impl FnOnce() -> Item) -> Arc<Item> {
        let mut shard = self.shards[self.shard_index(key)].write();
        if let Some(item) = shard.get(key)
            && !item.is_expired()
        {
            return item.clone();
        }
        let item = Arc::new(make());
        shard.insert(key.to_string(), item.clone());
        item
    }

    /// Remove as chaves presentes; retorna quantas foram de fato removidas.
    /// Atômico por chave, não como grupo.
    pub fn del(&self, keys: &[String]) -> usize {
        let mut count = 0;
        for (index, keys) in self.group_by_shard(keys) {
            let mut shard = self.shards[index].write();
            for key in keys {
                if shard.remove(key).is_some() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Retorna um submap com o subconjunto de `keys` que existe. Os Arcs
    /// retornados são referências de leitura estáveis.
    pub fn get_submap(&self, keys: &[String]) -> HashMap<String, Arc<Item>> {
        let mut submap = HashMap::with_capacity(keys.len());
        for (index, keys) in self.group_by_shard(keys) {
            let shard = self.shards[index].read();
            for key in keys {
                if let Some(item) = shard.get(key) {
                    submap.insert(key.clone(), item.clone());
                }
            }
        }
        submap
    }

    /// Remove cada chave do submap somente se o Item armazenado ainda é
    /// o MESMO objeto (Arc::ptr_eq). Um escritor que trocou o Item no
    /// meio do caminho vence: sua versão fica.
    pub fn del_submap(&self, submap: &HashMap<String, Arc<Item>>) -> usize {
        let keys: Vec<String> = submap.keys().cloned().collect();
        let mut count = 0;
        for (index, keys) in self.group_by_shard(&keys) {
            let mut shard = self.shards[index].write();
            for key in keys {
                let candidate = &submap[key];
                let same_item = shard
                    .get(key)
                    .is_some_and(|stored| Arc::ptr_eq(stored, candidate));
                if same_item {
                    shard.remove(key);
                    count += 1;
                }
            }
        }
        count
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Visão de um único shard, para o coletor de expiração varrer um
    /// shard por chamada.
    pub fn shard_snapshot(&self, index: usize) -> HashMap<String, Arc<Item>> {
        self.shards[index]
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Conteúdo completo do engine (testes e verificação de snapshot).
    pub fn data(&self) -> HashMap<String, Arc<Item>> {
        let mut data = HashMap::with_capacity(self.len());
        for shard in &self.shards {
            for (k, v) in shard.read().iter() {
                data.insert(k.clone(), v.clone());
            }
        }
        data
    }

    /// Substitui o conteúdo completo do engine.
    pub fn set_data(&self, data: HashMap<String, Arc<Item>>) {
        for shard in &self.shards {
            shard.write().clear();
        }
        for (key, item) in data {
            self.add_or_replace_one(key, item);
        }
    }

    /// Agrupa chaves por shard, em ordem ascendente de índice.
    /// A ordem determinística evita deadlock entre operações multi-shard.
    fn group_by_shard<'a>(&self, keys: &'a [String]) -> BTreeMap<usize, Vec<&'a String>> {
        let mut groups: BTreeMap<usize, Vec<&String>> = BTreeMap::new();
        for key in keys {
            groups.entry(self.shard_index(key)).or_default().push(key);
        }
        groups
    }

    /// Streama um snapshot completo do estado atual mais `message_id`.
    ///
    /// Formato: cabeçalho `SQDB | versão | message_id`, depois um registro
    /// por item (chave, deadline, kind, payload com prefixo de tamanho),
    /// encerrado por um sentinela. Nada é bufferizado além do registro
    /// corrente.
    pub fn persist<W: Write>(&self, dst: &mut W, message_id: u64) -> Result<(), SnapshotError> {
        dst.write_all(&SNAPSHOT_MAGIC)?;
        dst.write_all(&[SNAPSHOT_VERSION])?;
        dst.write_all(&message_id.to_be_bytes())?;

        for shard in &self.shards {
            let shard = shard.read();
            for (key, item) in shard.iter() {
                write_item(dst, key, item)?;
            }
        }

        dst.write_all(&END_OF_STREAM.to_be_bytes())?;
        Ok(())
    }

    /// Substitui o estado atual pelo snapshot lido de `src`; retorna o
    /// message_id embutido.
    pub fn load<R: Read>(&self, src: &mut R) -> Result<u64, SnapshotError> {
        let mut magic = [0u8; 4];
        src.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let version = read_u8(src)?;
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let message_id = read_u64(src)?;

        let mut data = HashMap::new();
        loop {
            let key_len = read_u32(src)?;
            if key_len == END_OF_STREAM {
                break;
            }
            let key = String::from_utf8(read_exact_len(src, key_len as usize)?)
                .map_err(|e| SnapshotError::Corrupt(format!("chave não-UTF8: {e}")))?;

            let expire_ms = read_u64(src)?;
            let expire_at = (expire_ms > 0).then(|| unix_ms_to_system_time(expire_ms));

            let value = read_value(src)?;
            data.insert(key, Arc::new(Item::restore(value, expire_at)));
        }

        self.set_data(data);
        Ok(message_id)
    }
}

impl Default for StorageHash {
    fn default() -> Self {
        Self::new()
    }
}

fn write_item<W: Write>(dst: &mut W, key: &str, item: &Item) -> Result<(), SnapshotError> {
    write_chunk(dst, key.as_bytes())?;

    let data = item.read();
    let expire_ms = data.expire_at.map(system_time_to_unix_ms).unwrap_or(0);
    dst.write_all(&expire_ms.to_be_bytes())?;

    match &data.value {
        Value::Bytes(payload) => {
            dst.write_all(&[kind_tag(ItemKind::Bytes)])?;
            write_chunk(dst, payload)?;
        }
        Value::List(values) => {
            dst.write_all(&[kind_tag(ItemKind::List)])?;
            dst.write_all(&(values.len() as u32).to_be_bytes())?;
            for value in values {
                write_chunk(dst, value)?;
            }
        }
        Value::Dict(fields) => {
            dst.write_all(&[kind_tag(ItemKind::Dict)])?;
            dst.write_all(&(fields.len() as u32).to_be_bytes())?;
            for (field, value) in fields {
                write_chunk(dst, field.as_bytes())?;
                write_chunk(dst, value)?;
            }
        }
    }

    Ok(())
}

fn read_value<R: Read>(src: &mut R) -> Result<Value, SnapshotError> {
    match read_u8(src)? {
        0 => Ok(Value::Bytes(read_chunk(src)?)),
        1 => {
            let count = read_u32(src)? as usize;
            let mut values = VecDeque::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push_back(read_chunk(src)?);
            }
            Ok(Value::List(values))
        }
        2 => {
            let count = read_u32(src)? as usize;
            let mut fields = HashMap::with_capacity(count.min(1024));
            for _ in 0..count {
                let field = String::from_utf8(read_chunk(src)?.to_vec())
                    .map_err(|e| SnapshotError::Corrupt(format!("campo não-UTF8: {e}")))?;
                fields.insert(field, read_chunk(src)?);
            }
            Ok(Value::Dict(fields))
        }
        tag => Err(SnapshotError::Corrupt(format!("kind desconhecido: {tag}"))),
    }
}

fn kind_tag(kind: ItemKind) -> u8 {
    match kind {
        ItemKind::Bytes => 0,
        ItemKind::List => 1,
        ItemKind::Dict => 2,
    }
}

fn write_chunk<W: Write>(dst: &mut W, payload: &[u8]) -> Result<(), SnapshotError> {
    dst.write_all(&(payload.len() as u32).to_be_bytes())?;
    dst.write_all(payload)?;
    Ok(())
}

fn read_chunk<R: Read>(src: &mut R) -> Result<Bytes, SnapshotError> {
    let len = read_u32(src)? as usize;
    Ok(Bytes::from(read_exact_len(src, len)?))
}

fn read_exact_len<R: Read>(src: &mut R, len: usize) -> Result<Vec<u8>, SnapshotError> {
    if len > MAX_FRAME_SIZE {
        return Err(SnapshotError::Corrupt(format!(
            "registro excede tamanho máximo: {len} bytes"
        )));
    }
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u8<R: Read>(src: &mut R) -> Result<u8, SnapshotError> {
    let mut buf = [0u8; 1];
    src.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(src: &mut R) -> Result<u32, SnapshotError> {
    let mut buf = [0u8; 4];
    src.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(src: &mut R) -> Result<u64, SnapshotError> {
    let mut buf = [0u8; 8];
    src.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn system_time_to_unix_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn unix_ms_to_system_time(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}
