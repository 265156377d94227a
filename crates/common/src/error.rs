use std::path::PathBuf;

/// Erros tipados do núcleo de comandos.
///
/// São valores de retorno, nunca panics: o processor traduz cada um para
/// um status de resposta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("chave não encontrada")]
    NotFound,
    #[error("operação contra chave com tipo errado")]
    WrongType,
    #[error("índice fora do intervalo da lista")]
    InvalidIndex,
    #[error("chave inexistente")]
    NoSuchKey,
}

/// Erros do codec RESP.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Ainda não há bytes suficientes no buffer; não é fatal, o leitor
    /// volta ao socket e tenta de novo.
    #[error("frame ainda incompleto no buffer")]
    Incomplete,
    #[error("marcador de frame desconhecido: {0:#04x}")]
    BadTypeByte(u8),
    #[error("comprimento inválido num frame: {0}")]
    BadLength(i64),
    #[error("frame de {len} bytes estoura o limite de {max}")]
    OversizedFrame { len: usize, max: usize },
    #[error("frame malformado: {0}")]
    Malformed(String),
}

/// Erros de validação de argumentos de um request.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("comando desconhecido: {0}")]
    Unknown(String),
    #[error("número errado de argumentos para '{0}'")]
    WrongArity(String),
    #[error("argumento inválido: {0}")]
    InvalidArgument(String),
}

/// Erros na borda TCP dos front-ends.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// O peer encerrou deixando um frame pela metade no buffer.
    #[error("peer encerrou a conexão no meio de um frame")]
    TruncatedStream,
    #[error("frame inválido recebido do peer: {0}")]
    BadFrame(#[from] ProtocolError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Erros do stream de snapshot do engine (Persist/Load).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("assinatura de snapshot inválida")]
    BadMagic,
    #[error("versão de snapshot não suportada: {0}")]
    UnsupportedVersion(u8),
    #[error("snapshot corrompido: {0}")]
    Corrupt(String),
}

/// Erros da camada de durabilidade (WAL + snapshot).
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("assinatura de WAL inválida em {0}")]
    BadWalMagic(PathBuf),
    #[error("versão de WAL não suportada: {0}")]
    UnsupportedWalVersion(u8),
    #[error("registro de WAL corrompido: {0}")]
    CorruptRecord(String),
    #[error("registro de WAL truncado no final do segmento")]
    TruncatedRecord,
    #[error("replay do comando '{cmd}' (id {id}) falhou: {detail}")]
    ReplayFailed { cmd: String, id: u64, detail: String },
    #[error("WAL já existe: {0}")]
    WalExists(PathBuf),
}

/// Erro top-level do SqualldB.
#[derive(Debug, thiserror::Error)]
pub enum SquallError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Keeper(#[from] KeeperError),
}

/// Result type alias.
pub type SquallResult<T> = Result<T, SquallError>;

// io::Error entra pelo caminho de conexão, o mais comum nos front-ends.
impl From<std::io::Error> for SquallError {
    fn from(e: std::io::Error) -> Self {
        SquallError::Connection(ConnectionError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_display() {
        assert_eq!(CoreError::NotFound.to_string(), "chave não encontrada");
        assert_eq!(
            CoreError::WrongType.to_string(),
            "operação contra chave com tipo errado"
        );
    }

    #[test]
    fn protocol_error_display() {
        assert_eq!(
            ProtocolError::OversizedFrame { len: 64, max: 32 }.to_string(),
            "frame de 64 bytes estoura o limite de 32"
        );
        assert_eq!(
            ProtocolError::BadTypeByte(b'?').to_string(),
            "marcador de frame desconhecido: 0x3f"
        );
    }

    #[test]
    fn connection_error_wraps_protocol() {
        let err: ConnectionError = ProtocolError::BadLength(-7).into();
        assert!(matches!(
            err,
            ConnectionError::BadFrame(ProtocolError::BadLength(-7))
        ));
    }

    #[test]
    fn squall_error_from_core() {
        let err: SquallError = CoreError::WrongType.into();
        assert!(matches!(err, SquallError::Core(CoreError::WrongType)));
    }

    #[test]
    fn squall_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
        let err: SquallError = io_err.into();
        assert!(matches!(
            err,
            SquallError::Connection(ConnectionError::Io(_))
        ));
    }

    #[test]
    fn keeper_error_wraps_snapshot() {
        let err: KeeperError = SnapshotError::BadMagic.into();
        assert!(matches!(err, KeeperError::Snapshot(SnapshotError::BadMagic)));
    }
}
