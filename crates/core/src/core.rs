use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use squalldb_common::CoreError;

use crate::glob::glob_match;
use crate::item::{Item, Value};
use crate::storage::StorageHash;

/// Núcleo de comandos: implementa as operações visíveis ao usuário sobre
/// o engine, aplicando expiração e erros tipados.
///
/// Disciplina de locking: o shard lock protege o mapa chave→Item; o lock
/// do próprio Item protege payload e deadline. Checagem de expiração e
/// mutação acontecem sob UMA aquisição do lock do item, para compor com
/// o coletor sem janelas.
#[derive(Clone)]
pub struct Core {
    engine: Arc<StorageHash>,
    collect_cursor: Arc<AtomicUsize>,
}

impl Core {
    pub fn new(engine: Arc<StorageHash>) -> Core {
        Core {
            engine,
            collect_cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn engine(&self) -> &Arc<StorageHash> {
        &self.engine
    }

    // --- Operações sobre bytes ---

    pub fn get(&self, key: &str) -> Result<Bytes, CoreError> {
        let item = self.engine.get(key).ok_or(CoreError::NotFound)?;
        let data = item.read();
        if data.is_expired() {
            return Err(CoreError::NotFound);
        }
        match &data.value {
            Value::Bytes(payload) => Ok(payload.clone()),
            _ => Err(CoreError::WrongType),
        }
    }

    /// Instala um Item de bytes sem TTL, descartando qualquer item anterior.
    pub fn set(&self, key: &str, value: Bytes) {
        self.engine
            .add_or_replace_one(key.to_string(), Arc::new(Item::from_bytes(value)));
    }

    /// Como `set`, com deadline `now + ttl_secs`. TTL não-positivo equivale
    /// a remover a chave.
    pub fn set_ex(&self, key: &str, ttl_secs: i64, value: Bytes) {
        if ttl_secs <= 0 {
            self.engine.del(std::slice::from_ref(&key.to_string()));
            return;
        }
        self.install_volatile(key, Duration::from_secs(ttl_secs as u64), value);
    }

    /// Variante em milissegundos, usada pelo replay do WAL (PSETEX).
    pub fn set_ex_ms(&self, key: &str, ttl_ms: i64, value: Bytes) {
        if ttl_ms <= 0 {
            self.engine.del(std::slice::from_ref(&key.to_string()));
            return;
        }
        self.install_volatile(key, Duration::from_millis(ttl_ms as u64), value);
    }

    fn install_volatile(&self, key: &str, ttl: Duration, value: Bytes) {
        let item = Item::from_bytes(value);
        item.write().set_ttl(ttl);
        self.engine.add_or_replace_one(key.to_string(), Arc::new(item));
    }

    pub fn del(&self, keys: &[String]) -> usize {
        self.engine.del(keys)
    }

    /// Chaves não-vencidas que casam o padrão glob (`*` e `?`).
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut matched = Vec::new();
        for key in self.engine.keys() {
            if !glob_match(pattern, &key) {
                continue;
            }
            if let Some(item) = self.engine.get(&key)
                && !item.is_expired()
            {
                matched.push(key);
            }
        }
        matched
    }

    // --- Operações sobre dicts ---

    pub fn dget(&self, key: &str, field: &str) -> Result<Bytes, CoreError> {
        let item = self.engine.get(key).ok_or(CoreError::NotFound)?;
        let data = item.read();
        if data.is_expired() {
            return Err(CoreError::NotFound);
        }
        match &data.value {
            Value::Dict(fields) => fields.get(field).cloned().ok_or(CoreError::NotFound),
            _ => Err(CoreError::WrongType),
        }
    }

    /// Grava um campo; retorna 1 se o campo é novo, 0 se sobrescreveu.
    /// Cria o dict se a chave está ausente ou vencida.
    pub fn dset(&self, key: &str, field: &str, value: Bytes) -> Result<i64, CoreError> {
        loop {
            let item = self
                .engine
                .get_live_or_insert(key, || Item::from_dict(HashMap::new()));
            let mut data = item.write();
            if data.is_expired() {
                // venceu entre a seleção e o lock; a próxima volta substitui
                drop(data);
                continue;
            }
            return match &mut data.value {
                Value::Dict(fields) => {
                    let fresh = fields.insert(field.to_string(), value).is_none();
                    Ok(if fresh { 1 } else { 0 })
                }
                _ => Err(CoreError::WrongType),
            };
        }
    }

    /// Campos do dict. Chave ausente ou vencida: lista vazia, sem erro.
    pub fn dkeys(&self, key: &str) -> Result<Vec<String>, CoreError> {
        let Some(item) = self.engine.get(key) else {
            return Ok(Vec::new());
        };
        let data = item.read();
        if data.is_expired() {
            return Ok(Vec::new());
        }
        match &data.value {
            Value::Dict(fields) => Ok(fields.keys().cloned().collect()),
            _ => Err(CoreError::WrongType),
        }
    }

    /// Pares campo/valor achatados: [f1, v1, f2, v2, …], ordem livre.
    pub fn dgetall(&self, key: &str) -> Result<Vec<Bytes>, CoreError> {
        let Some(item) = self.engine.get(key) else {
            return Ok(Vec::new());
        };
        let data = item.read();
        if data.is_expired() {
            return Ok(Vec::new());
        }
        match &data.value {
            Value::Dict(fields) => {
                let mut flat = Vec::with_capacity(fields.len() * 2);
                for (field, value) in fields {
                    flat.push(Bytes::copy_from_slice(field.as_bytes()));
                    flat.push(value.clone());
                }
                Ok(flat)
            }
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn ddel(&self, key: &str, fields: &[String]) -> Result<i64, CoreError> {
        let Some(item) = self.engine.get(key) else {
            return Ok(0);
        };
        let mut data = item.write();
        if data.is_expired() {
            return Ok(0);
        }
        match &mut data.value {
            Value::Dict(stored) => {
                let mut count = 0;
                for field in fields {
                    if stored.remove(field).is_some() {
                        count += 1;
                    }
                }
                Ok(count)
            }
            _ => Err(CoreError::WrongType),
        }
    }

    // --- Operações sobre listas ---

    /// Empilha valores na frente da lista: o último valor fornecido vira o
    /// novo head. Cria a lista se a chave está ausente ou vencida.
    pub fn lpush(&self, key: &str, values: &[Bytes]) -> Result<i64, CoreError> {
        loop {
            let item = self
                .engine
                .get_live_or_insert(key, || Item::from_list(VecDeque::new()));
            let mut data = item.write();
            if data.is_expired() {
                drop(data);
                continue;
            }
            return match &mut data.value {
                Value::List(list) => {
                    for value in values {
                        list.push_front(value.clone());
                    }
                    Ok(list.len() as i64)
                }
                _ => Err(CoreError::WrongType),
            };
        }
    }

    /// Remove e retorna o head. NotFound para chave ausente, vencida ou
    /// lista vazia.
    pub fn lpop(&self, key: &str) -> Result<Bytes, CoreError> {
        let item = self.engine.get(key).ok_or(CoreError::NotFound)?;
        let mut data = item.write();
        if data.is_expired() {
            return Err(CoreError::NotFound);
        }
        match &mut data.value {
            Value::List(list) => list.pop_front().ok_or(CoreError::NotFound),
            _ => Err(CoreError::WrongType),
        }
    }

    /// Fatia inclusiva [start, stop]; índices negativos contam do tail
    /// (-1 = último). Limites fora do intervalo são clampados; chave
    /// ausente ou vencida retorna fatia vazia sem erro.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, CoreError> {
        let Some(item) = self.engine.get(key) else {
            return Ok(Vec::new());
        };
        let data = item.read();
        if data.is_expired() {
            return Ok(Vec::new());
        }
        match &data.value {
            Value::List(list) => {
                let len = list.len() as i64;
                let start = if start < 0 { (len + start).max(0) } else { start };
                let stop = if stop < 0 { len + stop } else { stop };
                let stop = stop.min(len - 1);
                if start >= len || stop < 0 || start > stop {
                    return Ok(Vec::new());
                }
                Ok(list
                    .range(start as usize..=stop as usize)
                    .cloned()
                    .collect())
            }
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn lindex(&self, key: &str, index: i64) -> Result<Bytes, CoreError> {
        let item = self.engine.get(key).ok_or(CoreError::NotFound)?;
        let data = item.read();
        if data.is_expired() {
            return Err(CoreError::NotFound);
        }
        match &data.value {
            Value::List(list) => {
                let idx = normalize_index(index, list.len())?;
                Ok(list[idx].clone())
            }
            _ => Err(CoreError::WrongType),
        }
    }

    /// Sobrescreve a posição `index`. NoSuchKey distingue chave ausente de
    /// índice fora do intervalo (InvalidIndex).
    pub fn lset(&self, key: &str, index: i64, value: Bytes) -> Result<(), CoreError> {
        let item = self.engine.get(key).ok_or(CoreError::NoSuchKey)?;
        let mut data = item.write();
        if data.is_expired() {
            return Err(CoreError::NoSuchKey);
        }
        match &mut data.value {
            Value::List(list) => {
                let idx =
                    normalize_index(index, list.len()).map_err(|_| CoreError::InvalidIndex)?;
                list[idx] = value;
                Ok(())
            }
            _ => Err(CoreError::WrongType),
        }
    }

    /// Comprimento da lista; 0 para chave ausente ou vencida.
    pub fn llen(&self, key: &str) -> Result<i64, CoreError> {
        let Some(item) = self.engine.get(key) else {
            return Ok(0);
        };
        let data = item.read();
        if data.is_expired() {
            return Ok(0);
        }
        match &data.value {
            Value::List(list) => Ok(list.len() as i64),
            _ => Err(CoreError::WrongType),
        }
    }

    // --- TTL ---

    /// Define TTL numa chave viva; TTL não-positivo remove a chave e ainda
    /// retorna 1 se ela existia.
    pub fn expire(&self, key: &str, ttl_secs: i64) -> i64 {
        let ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs as u64));
        self.apply_ttl(key, ttl)
    }

    /// Variante em milissegundos, usada pelo replay do WAL (PEXPIRE).
    pub fn expire_ms(&self, key: &str, ttl_ms: i64) -> i64 {
        let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64));
        self.apply_ttl(key, ttl)
    }

    fn apply_ttl(&self, key: &str, ttl: Option<Duration>) -> i64 {
        let Some(item) = self.engine.get(key) else {
            return 0;
        };
        {
            let mut data = item.write();
            if data.is_expired() {
                return 0;
            }
            if let Some(ttl) = ttl {
                data.set_ttl(ttl);
                return 1;
            }
        }
        // TTL não-positivo: remoção por identidade, para não atropelar um
        // escritor concorrente que acabou de trocar o item
        let mut submap = HashMap::with_capacity(1);
        submap.insert(key.to_string(), item);
        self.engine.del_submap(&submap);
        1
    }

    /// Remove o TTL de uma chave volátil viva; 0 se ausente, vencida ou
    /// não-volátil.
    pub fn persist(&self, key: &str) -> i64 {
        let Some(item) = self.engine.get(key) else {
            return 0;
        };
        let mut data = item.write();
        if data.is_expired() || !data.has_ttl() {
            return 0;
        }
        data.remove_ttl();
        1
    }

    /// Segundos restantes; -1 para chave sem TTL, -2 para ausente/vencida.
    pub fn ttl(&self, key: &str) -> i64 {
        let Some(item) = self.engine.get(key) else {
            return -2;
        };
        let data = item.read();
        if data.is_expired() {
            -2
        } else if !data.has_ttl() {
            -1
        } else {
            data.ttl_secs()
        }
    }

    // --- Coletor de expiração ---

    /// Varre UM shard por chamada (ciclando), coleta os itens vencidos num
    /// submap local e os remove com semântica de identidade: um escritor
    /// que trocou o item no meio do caminho mantém o dele. Retorna quantos
    /// itens foram de fato removidos.
    pub fn collect_expired(&self) -> usize {
        let index =
            self.collect_cursor.fetch_add(1, Ordering::Relaxed) % self.engine.shard_count();

        let mut expired = HashMap::new();
        for (key, item) in self.engine.shard_snapshot(index) {
            if item.is_expired() {
                expired.insert(key, item);
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let removed = self.engine.del_submap(&expired);
        if removed > 0 {
            debug!(shard = index, removed, "itens vencidos coletados");
        }
        removed
    }
}

/// Normaliza um índice de lista (negativos contam do tail).
fn normalize_index(index: i64, len: usize) -> Result<usize, CoreError> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        return Err(CoreError::NotFound);
    }
    Ok(idx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;

    /// Engine de amostra: bytes volátil, dict, lista (head = "um"), uma
    /// chave multibyte e uma chave já vencida.
    fn sample_core() -> Core {
        let engine = Arc::new(StorageHash::new());

        let volatile = Arc::new(Item::from_bytes(Bytes::from("valor com prazo")));
        volatile.write().set_ttl(Duration::from_secs(1000));

        let expired = Arc::new(Item::from_bytes(Bytes::from("vencido")));
        expired.write().set_ttl(Duration::from_millis(1));

        let mut dict = HashMap::new();
        dict.insert("banana".to_string(), Bytes::from("mama"));
        dict.insert("測試".to_string(), Bytes::from("quarenta e dois"));

        let list: VecDeque<Bytes> =
            [Bytes::from("um"), Bytes::from("dois"), Bytes::from("três")]
                .into_iter()
                .collect();

        let mut data = HashMap::new();
        data.insert("bytes".to_string(), volatile);
        data.insert("dict".to_string(), Arc::new(Item::from_dict(dict)));
        data.insert("list".to_string(), Arc::new(Item::from_list(list)));
        data.insert(
            "測".to_string(),
            Arc::new(Item::from_bytes(Bytes::from("multibyte"))),
        );
        data.insert("expired".to_string(), expired);

        std::thread::sleep(Duration::from_millis(5));
        engine.set_data(data);
        Core::new(engine)
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn keys_skips_expired() {
        let c = sample_core();
        assert_eq!(
            sorted(c.keys("*")),
            vec!["bytes", "dict", "list", "測"]
        );
        assert_eq!(sorted(c.keys("bytes")), vec!["bytes"]);
        assert_eq!(sorted(c.keys("*i*")), vec!["dict", "list"]);
        assert!(c.keys("expired").is_empty());
    }

    #[test]
    fn get_table() {
        let c = sample_core();
        assert_eq!(c.get("bytes").unwrap(), Bytes::from("valor com prazo"));
        assert_eq!(c.get("測").unwrap(), Bytes::from("multibyte"));
        assert_eq!(c.get("404"), Err(CoreError::NotFound));
        assert_eq!(c.get("expired"), Err(CoreError::NotFound));
        assert_eq!(c.get("dict"), Err(CoreError::WrongType));
    }

    #[test]
    fn set_replaces_any_previous_item() {
        let c = sample_core();
        for key in ["bytes", "dict", "expired", "chave nova"] {
            c.set(key, Bytes::from(format!("novo valor de {key}")));
            assert_eq!(
                c.get(key).unwrap(),
                Bytes::from(format!("novo valor de {key}"))
            );
            assert_eq!(c.ttl(key), -1);
        }
    }

    #[test]
    fn set_ex_applies_deadline() {
        let c = sample_core();
        c.set_ex("k", 10, Bytes::from("dez segundos"));
        assert_eq!(c.get("k").unwrap(), Bytes::from("dez segundos"));
        assert_eq!(c.ttl("k"), 10);
    }

    #[test]
    fn set_ex_non_positive_deletes() {
        let c = sample_core();
        // inclusive sobre um item de outro kind
        c.set_ex("dict", 0, Bytes::from("ignorado"));
        assert_eq!(c.get("dict"), Err(CoreError::NotFound));
        assert!(c.engine().get("dict").is_none());
    }

    #[test]
    fn del_returns_removed_count() {
        let c = sample_core();
        assert_eq!(c.del(&["bytes".into(), "404".into(), "list".into()]), 2);
        assert_eq!(c.get("bytes"), Err(CoreError::NotFound));
    }

    #[test]
    fn dget_table() {
        let c = sample_core();
        assert_eq!(c.dget("bytes", "x"), Err(CoreError::WrongType));
        assert_eq!(c.dget("404", "x"), Err(CoreError::NotFound));
        assert_eq!(c.dget("expired", "x"), Err(CoreError::NotFound));
        assert_eq!(c.dget("dict", "404"), Err(CoreError::NotFound));
        assert_eq!(c.dget("dict", "banana").unwrap(), Bytes::from("mama"));
        assert_eq!(
            c.dget("dict", "測試").unwrap(),
            Bytes::from("quarenta e dois")
        );
    }

    #[test]
    fn dset_counts_new_fields() {
        let c = sample_core();
        assert_eq!(c.dset("bytes", "f", Bytes::from("v")), Err(CoreError::WrongType));

        // chave ausente e chave vencida criam dicts novos
        assert_eq!(c.dset("404", "f", Bytes::from("v")).unwrap(), 1);
        assert_eq!(c.dset("expired", "f", Bytes::from("v")).unwrap(), 1);
        assert_eq!(c.engine().get("expired").unwrap().kind(), ItemKind::Dict);

        assert_eq!(c.dset("dict", "novo", Bytes::from("v")).unwrap(), 1);
        assert_eq!(c.dset("dict", "banana", Bytes::from("manga")).unwrap(), 0);
        assert_eq!(c.dget("dict", "banana").unwrap(), Bytes::from("manga"));
    }

    #[test]
    fn dkeys_table() {
        let c = sample_core();
        assert_eq!(c.dkeys("bytes"), Err(CoreError::WrongType));
        assert!(c.dkeys("404").unwrap().is_empty());
        assert!(c.dkeys("expired").unwrap().is_empty());
        assert_eq!(sorted(c.dkeys("dict").unwrap()), vec!["banana", "測試"]);
    }

    #[test]
    fn dgetall_flattens_pairs() {
        let c = sample_core();
        assert_eq!(c.dgetall("bytes"), Err(CoreError::WrongType));
        assert!(c.dgetall("404").unwrap().is_empty());

        let flat = c.dgetall("dict").unwrap();
        assert_eq!(flat.len(), 4);
        let mut found = HashMap::new();
        for pair in flat.chunks(2) {
            found.insert(pair[0].clone(), pair[1].clone());
        }
        assert_eq!(found[&Bytes::from("banana")], Bytes::from("mama"));
        assert_eq!(found[&Bytes::from("測試")], Bytes::from("quarenta e dois"));
    }

    #[test]
    fn ddel_counts_removed_fields() {
        let c = sample_core();
        assert_eq!(c.ddel("bytes", &["x".into()]), Err(CoreError::WrongType));
        assert_eq!(c.ddel("404", &["banana".into()]).unwrap(), 0);
        assert_eq!(c.ddel("expired", &["banana".into()]).unwrap(), 0);
        assert_eq!(
            c.ddel("dict", &["banana".into(), "nada".into()]).unwrap(),
            1
        );
        assert_eq!(sorted(c.dkeys("dict").unwrap()), vec!["測試"]);
    }

    #[test]
    fn llen_table() {
        let c = sample_core();
        assert_eq!(c.llen("bytes"), Err(CoreError::WrongType));
        assert_eq!(c.llen("404").unwrap(), 0);
        assert_eq!(c.llen("expired").unwrap(), 0);
        assert_eq!(c.llen("list").unwrap(), 3);
    }

    #[test]
    fn lrange_table() {
        let c = sample_core();
        assert_eq!(c.lrange("bytes", 0, 0), Err(CoreError::WrongType));
        // chave ausente ou vencida: fatia vazia, sem erro
        assert!(c.lrange("404", 0, 0).unwrap().is_empty());
        assert!(c.lrange("expired", 0, 0).unwrap().is_empty());

        let cases: &[(i64, i64, &[&str])] = &[
            (0, 0, &["um"]),
            (0, 10, &["um", "dois", "três"]),
            (1, 2, &["dois", "três"]),
            (10, 10, &[]),
            (-2, -1, &["dois", "três"]),
            (-1, 10, &["três"]),
            (-3, -3, &["um"]),
            (-1, -2, &[]),
            (-10, -10, &[]),
            (-1, -1, &["três"]),
        ];
        for (start, stop, want) in cases {
            let got = c.lrange("list", *start, *stop).unwrap();
            let want: Vec<Bytes> = want.iter().map(|s| Bytes::from(*s)).collect();
            assert_eq!(got, want, "LRANGE list {start} {stop}");
        }
    }

    #[test]
    fn lindex_table() {
        let c = sample_core();
        assert_eq!(c.lindex("bytes", 0), Err(CoreError::WrongType));
        assert_eq!(c.lindex("404", 0), Err(CoreError::NotFound));
        assert_eq!(c.lindex("expired", 0), Err(CoreError::NotFound));
        assert_eq!(c.lindex("list", 0).unwrap(), Bytes::from("um"));
        assert_eq!(c.lindex("list", 2).unwrap(), Bytes::from("três"));
        assert_eq!(c.lindex("list", -1).unwrap(), Bytes::from("três"));
        assert_eq!(c.lindex("list", -3).unwrap(), Bytes::from("um"));
        assert_eq!(c.lindex("list", 10), Err(CoreError::NotFound));
        assert_eq!(c.lindex("list", -10), Err(CoreError::NotFound));
    }

    #[test]
    fn lset_table() {
        let c = sample_core();
        assert_eq!(
            c.lset("bytes", 0, Bytes::from("x")),
            Err(CoreError::WrongType)
        );
        assert_eq!(
            c.lset("404", 0, Bytes::from("x")),
            Err(CoreError::NoSuchKey)
        );
        assert_eq!(
            c.lset("expired", 0, Bytes::from("x")),
            Err(CoreError::NoSuchKey)
        );
        assert_eq!(
            c.lset("list", 10, Bytes::from("x")),
            Err(CoreError::InvalidIndex)
        );
        assert_eq!(
            c.lset("list", -10, Bytes::from("x")),
            Err(CoreError::InvalidIndex)
        );

        c.lset("list", 0, Bytes::from("cabeça")).unwrap();
        c.lset("list", -1, Bytes::from("cauda")).unwrap();
        assert_eq!(c.lindex("list", 0).unwrap(), Bytes::from("cabeça"));
        assert_eq!(c.lindex("list", 2).unwrap(), Bytes::from("cauda"));
    }

    #[test]
    fn lpush_last_value_becomes_head() {
        let c = sample_core();
        assert_eq!(
            c.lpush("bytes", &[Bytes::from("x")]),
            Err(CoreError::WrongType)
        );

        let values = [Bytes::from("a"), Bytes::from("b"), Bytes::from("c")];
        assert_eq!(c.lpush("404", &values).unwrap(), 3);
        assert_eq!(
            c.lrange("404", 0, -1).unwrap(),
            vec![Bytes::from("c"), Bytes::from("b"), Bytes::from("a")]
        );

        // chave vencida recomeça do zero
        assert_eq!(c.lpush("expired", &values).unwrap(), 3);
        assert_eq!(c.engine().get("expired").unwrap().kind(), ItemKind::List);

        assert_eq!(c.lpush("list", &values).unwrap(), 6);
        assert_eq!(
            c.lrange("list", 0, -1).unwrap(),
            vec![
                Bytes::from("c"),
                Bytes::from("b"),
                Bytes::from("a"),
                Bytes::from("um"),
                Bytes::from("dois"),
                Bytes::from("três"),
            ]
        );
    }

    #[test]
    fn lpop_drains_head_first() {
        let c = sample_core();
        assert_eq!(c.lpop("bytes"), Err(CoreError::WrongType));
        assert_eq!(c.lpop("404"), Err(CoreError::NotFound));
        assert_eq!(c.lpop("expired"), Err(CoreError::NotFound));

        assert_eq!(c.lpop("list").unwrap(), Bytes::from("um"));
        assert_eq!(c.lpop("list").unwrap(), Bytes::from("dois"));
        assert_eq!(c.lpop("list").unwrap(), Bytes::from("três"));
        // lista vazia continua existindo, mas LPOP dá NotFound
        assert_eq!(c.lpop("list"), Err(CoreError::NotFound));
        assert_eq!(c.llen("list").unwrap(), 0);
    }

    #[test]
    fn expire_table() {
        let c = sample_core();
        assert_eq!(c.expire("bytes", 10), 1);
        assert_eq!(c.ttl("bytes"), 10);

        // TTL não-positivo remove e ainda retorna 1
        assert_eq!(c.expire("dict", 0), 1);
        assert_eq!(c.get("dict"), Err(CoreError::NotFound));

        assert_eq!(c.expire("404", 11), 0);
        assert_eq!(c.expire("expired", 12), 0);
    }

    #[test]
    fn persist_table() {
        let c = sample_core();
        assert_eq!(c.persist("bytes"), 1);
        assert_eq!(c.ttl("bytes"), -1);

        // não-volátil, ausente e vencida: 0
        assert_eq!(c.persist("dict"), 0);
        assert_eq!(c.persist("404"), 0);
        assert_eq!(c.persist("expired"), 0);
    }

    #[test]
    fn ttl_table() {
        let c = sample_core();
        assert_eq!(c.ttl("bytes"), 1000);
        assert_eq!(c.ttl("dict"), -1);
        assert_eq!(c.ttl("404"), -2);
        assert_eq!(c.ttl("expired"), -2);
    }

    #[test]
    fn collector_removes_only_expired() {
        let engine = Arc::new(StorageHash::new());
        let c = Core::new(engine.clone());

        for i in 0..200i64 {
            c.set(&format!("estável:{i}"), Bytes::from("fica"));
            c.set_ex_ms(&format!("volátil:{i}"), 1 + (i % 40), Bytes::from("some"));
        }
        std::thread::sleep(Duration::from_millis(60));

        let mut removed = 0;
        for _ in 0..engine.shard_count() {
            removed += c.collect_expired();
        }
        assert_eq!(removed, 200);
        assert_eq!(engine.len(), 200);
        for (key, item) in engine.data() {
            assert!(!item.is_expired(), "item vencido sobrou: {key}");
        }
    }

    #[test]
    fn collector_respects_identity_of_replaced_items() {
        let engine = Arc::new(StorageHash::new());
        let c = Core::new(engine.clone());

        c.set_ex_ms("k", 1, Bytes::from("logo morre"));
        std::thread::sleep(Duration::from_millis(5));

        // O coletor observa o item vencido…
        let observed = engine.get_submap(&["k".to_string()]);
        assert!(observed["k"].is_expired());

        // …mas um SET concorrente troca o item antes do DelSubmap.
        c.set("k", Bytes::from("recém-nascido"));
        assert_eq!(engine.del_submap(&observed), 0);
        assert_eq!(c.get("k").unwrap(), Bytes::from("recém-nascido"));
    }

    #[test]
    fn collector_races_with_persist_workers() {
        let engine = Arc::new(StorageHash::new());
        let c = Core::new(engine.clone());

        let keys_count = 2000;
        let mut keys = Vec::with_capacity(keys_count);
        for i in 0..keys_count {
            let key = format!("b:{i}");
            c.set_ex_ms(&key, 1 + (i as i64 % 50), Bytes::from("payload"));
            keys.push(key);
        }

        let queue = Arc::new(std::sync::Mutex::new(keys));
        let rescued = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        // coletor dedicado ciclando os shards
        let collector = {
            let c = c.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    c.collect_expired();
                }
                // mais uma volta completa depois do sinal
                for _ in 0..c.engine().shard_count() {
                    c.collect_expired();
                }
            })
        };

        // workers disputando com o coletor: PERSIST nas chaves da fila
        let mut workers = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let queue = queue.clone();
            let rescued = rescued.clone();
            workers.push(std::thread::spawn(move || {
                loop {
                    let key = { queue.lock().unwrap().pop() };
                    let Some(key) = key else { break };
                    if c.persist(&key) == 1 {
                        rescued.lock().unwrap().push(key);
                    }
                }
            }));
        }
        for w in workers {
            w.join().unwrap();
        }

        // garante que todo volátil restante venceu antes da última volta
        std::thread::sleep(Duration::from_millis(80));
        stop.store(true, Ordering::Relaxed);
        collector.join().unwrap();

        let mut survivors: Vec<String> = engine.data().keys().cloned().collect();
        let mut rescued = Arc::try_unwrap(rescued)
            .unwrap()
            .into_inner()
            .unwrap();
        survivors.sort();
        rescued.sort();
        assert_eq!(
            survivors, rescued,
            "só as chaves resgatadas por PERSIST podem sobrar"
        );
        for (key, item) in engine.data() {
            assert!(!item.is_expired(), "item vencido no estado final: {key}");
        }
    }

    #[test]
    fn concurrent_mixed_operations() {
        let c = Core::new(Arc::new(StorageHash::new()));

        let mut handles = Vec::new();
        for w in 0..8 {
            let c = c.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("b:{w}:{i}");
                    c.set(&key, Bytes::from("v"));
                    let _ = c.get(&key);
                    c.set_ex(&key, 1000, Bytes::from("v2"));
                    c.persist(&key);
                    c.expire(&key, 1000);
                    c.ttl(&key);

                    let dkey = format!("d:{w}:{i}");
                    let _ = c.dset(&dkey, "f1", Bytes::from("v"));
                    let _ = c.dget(&dkey, "f1");
                    let _ = c.dgetall(&dkey);
                    let _ = c.ddel(&dkey, &["f1".to_string()]);

                    let lkey = format!("l:{w}:{i}");
                    let _ = c.lpush(&lkey, &[Bytes::from("a"), Bytes::from("b")]);
                    let _ = c.lset(&lkey, 0, Bytes::from("c"));
                    let _ = c.lindex(&lkey, -1);
                    let _ = c.lrange(&lkey, 0, -1);
                    let _ = c.lpop(&lkey);

                    c.keys("*");
                    c.collect_expired();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 8 workers × 50 iterações × 3 famílias de chaves
        assert_eq!(c.keys("*").len(), 8 * 50 * 3);
    }
}
