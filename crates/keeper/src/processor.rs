use std::time::{Duration, SystemTime};

use bytes::Bytes;

use squalldb_common::{CommandError, CoreError, KeeperError};
use squalldb_core::Core;
use squalldb_protocol::{Args, Request, Response};

/// Comandos que mutam o engine e portanto passam pelo WAL.
pub fn is_write_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "SET"
            | "SETEX"
            | "PSETEX"
            | "DEL"
            | "DSET"
            | "DDEL"
            | "LPUSH"
            | "LPOP"
            | "LSET"
            | "EXPIRE"
            | "PEXPIRE"
            | "PERSIST"
    )
}

/// Despacha um request para a operação do Core correspondente e embala o
/// resultado num Response. Aridade e parse numérico são validados antes
/// de tocar o engine.
#[derive(Clone)]
pub struct Processor {
    core: Core,
}

impl Processor {
    pub fn new(core: Core) -> Processor {
        Processor { core }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn process(&self, req: &Request) -> Response {
        match self.dispatch(req) {
            Ok(response) => response,
            Err(CommandError::Unknown(cmd)) => Response::invalid_command(&cmd),
            Err(e) => Response::invalid_arguments(e.to_string()),
        }
    }

    fn dispatch(&self, req: &Request) -> Result<Response, CommandError> {
        let c = &self.core;
        let mut args = Args::new(&req.cmd, &req.args);

        let response = match req.cmd.as_str() {
            "GET" => {
                let key = args.next_str()?;
                args.finish()?;
                reply(c.get(&key).map(Response::string))
            }
            "SET" => {
                let key = args.next_str()?;
                let value = args.next_bytes()?;
                args.finish()?;
                c.set(&key, value);
                Response::ok()
            }
            "SETEX" => {
                let key = args.next_str()?;
                let ttl = args.next_int()?;
                let value = args.next_bytes()?;
                args.finish()?;
                c.set_ex(&key, ttl, value);
                Response::ok()
            }
            "PSETEX" => {
                let key = args.next_str()?;
                let ttl = args.next_int()?;
                let value = args.next_bytes()?;
                args.finish()?;
                c.set_ex_ms(&key, ttl, value);
                Response::ok()
            }
            "DEL" => {
                let keys = args.rest_strings()?;
                Response::int(c.del(&keys) as i64)
            }
            "KEYS" => {
                let pattern = args.next_str()?;
                args.finish()?;
                let keys = c
                    .keys(&pattern)
                    .into_iter()
                    .map(|k| Bytes::from(k.into_bytes()))
                    .collect();
                Response::string_slice(keys)
            }
            "DSET" => {
                let key = args.next_str()?;
                let field = args.next_str()?;
                let value = args.next_bytes()?;
                args.finish()?;
                reply(c.dset(&key, &field, value).map(Response::int))
            }
            "DGET" => {
                let key = args.next_str()?;
                let field = args.next_str()?;
                args.finish()?;
                reply(c.dget(&key, &field).map(Response::string))
            }
            "DKEYS" => {
                let key = args.next_str()?;
                args.finish()?;
                reply(c.dkeys(&key).map(|fields| {
                    Response::string_slice(
                        fields.into_iter().map(|f| Bytes::from(f.into_bytes())).collect(),
                    )
                }))
            }
            "DGETALL" => {
                let key = args.next_str()?;
                args.finish()?;
                reply(c.dgetall(&key).map(Response::string_slice))
            }
            "DDEL" => {
                let key = args.next_str()?;
                let fields = args.rest_strings()?;
                reply(c.ddel(&key, &fields).map(Response::int))
            }
            "LPUSH" => {
                let key = args.next_str()?;
                let values = args.rest_bytes()?;
                reply(c.lpush(&key, &values).map(Response::int))
            }
            "LPOP" => {
                let key = args.next_str()?;
                args.finish()?;
                reply(c.lpop(&key).map(Response::string))
            }
            "LRANGE" => {
                let key = args.next_str()?;
                let start = args.next_int()?;
                let stop = args.next_int()?;
                args.finish()?;
                reply(c.lrange(&key, start, stop).map(Response::string_slice))
            }
            "LINDEX" => {
                let key = args.next_str()?;
                let index = args.next_int()?;
                args.finish()?;
                reply(c.lindex(&key, index).map(Response::string))
            }
            "LSET" => {
                let key = args.next_str()?;
                let index = args.next_int()?;
                let value = args.next_bytes()?;
                args.finish()?;
                reply(c.lset(&key, index, value).map(|()| Response::ok()))
            }
            "LLEN" => {
                let key = args.next_str()?;
                args.finish()?;
                reply(c.llen(&key).map(Response::int))
            }
            "EXPIRE" => {
                let key = args.next_str()?;
                let ttl = args.next_int()?;
                args.finish()?;
                Response::int(c.expire(&key, ttl))
            }
            "PEXPIRE" => {
                let key = args.next_str()?;
                let ttl = args.next_int()?;
                args.finish()?;
                Response::int(c.expire_ms(&key, ttl))
            }
            "PERSIST" => {
                let key = args.next_str()?;
                args.finish()?;
                Response::int(c.persist(&key))
            }
            "TTL" => {
                let key = args.next_str()?;
                args.finish()?;
                Response::int(c.ttl(&key))
            }
            _ => return Err(CommandError::Unknown(req.cmd.clone())),
        };

        Ok(response)
    }

    /// Recalcula o TTL de um request reaplicado do WAL: o deadline
    /// original era `timestamp + ttl`, e o replay acontece depois.
    /// Reescreve SETEX/EXPIRE como a variante em milissegundos com
    /// `max(1ms, deadline - agora)`; um request já vencido instala um item
    /// que expira imediatamente, equivalente a ser pulado.
    pub fn fix_request_ttl(&self, req: &mut Request) -> Result<(), KeeperError> {
        let (milli_cmd, ttl_pos) = match req.cmd.as_str() {
            "SETEX" => ("PSETEX", 1),
            "EXPIRE" => ("PEXPIRE", 1),
            _ => return Ok(()),
        };

        let raw = req.args.get(ttl_pos).ok_or_else(|| {
            KeeperError::CorruptRecord(format!("request {} sem argumento de TTL", req.cmd))
        })?;
        let ttl_secs: i64 = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                KeeperError::CorruptRecord(format!("TTL inválido no request {}", req.cmd))
            })?;

        // TTL não-positivo é remoção; não depende do relógio
        if ttl_secs <= 0 {
            return Ok(());
        }

        let deadline = req.timestamp + Duration::from_secs(ttl_secs as u64);
        let remaining_ms = deadline
            .duration_since(SystemTime::now())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
            .max(1);

        req.cmd = milli_cmd.to_string();
        req.args[ttl_pos] = Bytes::from(remaining_ms.to_string());
        Ok(())
    }
}

/// Traduz o resultado tipado do Core para um Response.
fn reply(result: Result<Response, CoreError>) -> Response {
    match result {
        Ok(response) => response,
        Err(CoreError::NotFound) => Response::not_found(),
        Err(CoreError::WrongType) => Response::type_mismatch(),
        Err(CoreError::InvalidIndex) => Response::error("index out of range"),
        Err(CoreError::NoSuchKey) => Response::error("no such key"),
    }
}
