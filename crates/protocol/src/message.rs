use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;

/// Request neutro trocado entre front-ends, Keeper e processor.
///
/// `id` é atribuído pelo Keeper ao gravar no WAL (0 = ainda sem id).
/// `timestamp` é o relógio de parede da criação do request; o replay usa
/// ele para recalcular deadlines de TTL. `unreliable` marca requests
/// (pipelined) que não passam pelo WAL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub cmd: String,
    pub args: Vec<Bytes>,
    pub timestamp: SystemTime,
    pub unreliable: bool,
    pub meta: HashMap<String, String>,
}

impl Request {
    pub fn new(cmd: impl AsRef<str>, args: Vec<Bytes>) -> Request {
        Request {
            id: 0,
            cmd: cmd.as_ref().to_uppercase(),
            args,
            timestamp: SystemTime::now(),
            unreliable: false,
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Request {
        self.meta = meta;
        self
    }

    /// Atalho para construir requests em testes: argumentos como &str.
    pub fn from_strs(cmd: &str, args: &[&str]) -> Request {
        Request::new(
            cmd,
            args.iter()
                .map(|a| Bytes::copy_from_slice(a.as_bytes()))
                .collect(),
        )
    }
}

/// Status de uma resposta do processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    Error,
    InvalidCommand,
    TypeMismatch,
    InvalidArguments,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::Error => "ERROR",
            Status::InvalidCommand => "INVALID_COMMAND",
            Status::TypeMismatch => "TYPE_MISMATCH",
            Status::InvalidArguments => "INVALID_ARGUMENTS",
        };
        f.write_str(s)
    }
}

/// Resposta neutra produzida pelo processor.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Status { status: Status, payload: String },
    String { payload: Bytes },
    StringSlice { payload: Vec<Bytes> },
    Int { payload: i64 },
}

impl Response {
    pub fn ok() -> Response {
        Response::Status {
            status: Status::Ok,
            payload: String::new(),
        }
    }

    pub fn not_found() -> Response {
        Response::Status {
            status: Status::NotFound,
            payload: String::new(),
        }
    }

    pub fn error(payload: impl Into<String>) -> Response {
        Response::Status {
            status: Status::Error,
            payload: payload.into(),
        }
    }

    pub fn invalid_command(cmd: &str) -> Response {
        Response::Status {
            status: Status::InvalidCommand,
            payload: format!("unknown command '{cmd}'"),
        }
    }

    pub fn invalid_arguments(payload: impl Into<String>) -> Response {
        Response::Status {
            status: Status::InvalidArguments,
            payload: payload.into(),
        }
    }

    pub fn type_mismatch() -> Response {
        Response::Status {
            status: Status::TypeMismatch,
            payload: String::new(),
        }
    }

    pub fn string(payload: Bytes) -> Response {
        Response::String { payload }
    }

    pub fn string_slice(payload: Vec<Bytes>) -> Response {
        Response::StringSlice { payload }
    }

    pub fn int(payload: i64) -> Response {
        Response::Int { payload }
    }

    /// Status efetivo: respostas com payload tipado contam como Ok.
    pub fn status(&self) -> Status {
        match self {
            Response::Status { status, .. } => *status,
            _ => Status::Ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == Status::Ok
    }
}
