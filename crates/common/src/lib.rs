#![forbid(unsafe_code)]

mod error;

pub use error::*;

/// Porta RESP padrão do SqualldB.
pub const DEFAULT_PORT: u16 = 6380;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Teto de conexões simultâneas no front-end RESP. O engine aguenta bem
/// mais, mas cada conexão ociosa segura um buffer de leitura inteiro.
pub const MAX_CONNECTIONS: usize = 512;

/// Capacidade inicial do buffer de leitura por conexão. 16 KB absorve um
/// pipeline típico sem realocar.
pub const READ_BUFFER_CAPACITY: usize = 16 * 1024;

/// Maior frame aceito no wire, e também o teto de um registro nos
/// arquivos de dados. Valores maiores que isso indicam corrupção ou
/// abuso, não carga legítima.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Intervalo padrão entre rotações de snapshot.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;
