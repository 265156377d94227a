use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tipo do valor armazenado. Imutável após a construção do Item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Bytes,
    List,
    Dict,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Bytes => f.write_str("bytes"),
            ItemKind::List => f.write_str("list"),
            ItemKind::Dict => f.write_str("dict"),
        }
    }
}

/// Payload de um Item.
///
/// Na lista, o índice 0 é o HEAD do protocolo: LPUSH insere pela frente.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Bytes),
    List(VecDeque<Bytes>),
    Dict(HashMap<String, Bytes>),
}

impl Value {
    pub fn kind(&self) -> ItemKind {
        match self {
            Value::Bytes(_) => ItemKind::Bytes,
            Value::List(_) => ItemKind::List,
            Value::Dict(_) => ItemKind::Dict,
        }
    }
}

/// Estado mutável de um Item: payload + deadline de expiração.
///
/// Deadline em relógio de parede (SystemTime) para sobreviver a
/// snapshot e replay de WAL.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemData {
    pub value: Value,
    pub expire_at: Option<SystemTime>,
}

impl ItemData {
    pub fn has_ttl(&self) -> bool {
        self.expire_at.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expire_at
            .map(|deadline| deadline <= SystemTime::now())
            .unwrap_or(false)
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.expire_at = Some(SystemTime::now() + ttl);
    }

    pub fn remove_ttl(&mut self) {
        self.expire_at = None;
    }

    /// TTL restante em segundos, arredondado para o inteiro mais próximo.
    /// 0 para itens já vencidos; só faz sentido em itens voláteis.
    pub fn ttl_secs(&self) -> i64 {
        let Some(deadline) = self.expire_at else {
            return 0;
        };
        let remaining_ms = deadline
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            .as_millis() as i64;
        (remaining_ms + 500) / 1000
    }
}

/// Valor taggeado armazenado pelo engine: payload + TTL opcional, com
/// lock próprio para edições in-place.
///
/// Circula como `Arc<Item>`; a igualdade de identidade usada pelo
/// `DelSubmap` é `Arc::ptr_eq`, nunca a igualdade estrutural.
pub struct Item {
    kind: ItemKind,
    data: RwLock<ItemData>,
}

impl Item {
    pub fn from_bytes(value: Bytes) -> Item {
        Item::restore(Value::Bytes(value), None)
    }

    pub fn from_list(values: VecDeque<Bytes>) -> Item {
        Item::restore(Value::List(values), None)
    }

    pub fn from_dict(fields: HashMap<String, Bytes>) -> Item {
        Item::restore(Value::Dict(fields), None)
    }

    /// Reconstrói um Item com deadline explícito (snapshot Load).
    pub fn restore(value: Value, expire_at: Option<SystemTime>) -> Item {
        Item {
            kind: value.kind(),
            data: RwLock::new(ItemData { value, expire_at }),
        }
    }

    /// Kind do payload; lível sem adquirir o lock.
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ItemData> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ItemData> {
        self.data.write()
    }

    pub fn is_expired(&self) -> bool {
        self.read().is_expired()
    }
}

// Igualdade estrutural, usada pelos testes de snapshot. A identidade
// do engine continua sendo Arc::ptr_eq.
impl PartialEq for Item {
    fn eq(&self, other: &Item) -> bool {
        self.kind == other.kind && *self.read() == *other.read()
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.read();
        f.debug_struct("Item")
            .field("kind", &self.kind)
            .field("value", &data.value)
            .field("expire_at", &data.expire_at)
            .finish()
    }
}
