use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::{Instant, interval};
use tracing::{error, info, warn};

use squalldb_common::KeeperError;
use squalldb_core::Core;
use squalldb_protocol::{Request, Response, Status};

use crate::processor::Processor;
use crate::wal::{WalCursor, encode_header, encode_request};

const SNAPSHOT_FILE: &str = "storage.bin";
const SNAPSHOT_TEMP_FILE: &str = "storage.bin.tmp";
const WAL_PREFIX: &str = "wal_";
const WAL_SUFFIX: &str = ".bin";

/// Política de fsync do WAL.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Nunca chama fsync explicitamente (fica por conta do SO).
    Never,
    /// Fsync se passou pelo menos 1 segundo desde o último.
    #[default]
    Sometimes,
    /// Fsync após cada request gravado.
    Always,
}

struct WalState {
    message_id: u64,
    file: Option<File>,
    path: Option<PathBuf>,
    last_sync: Instant,
}

/// Camada de durabilidade: serializa os requests de escrita num log
/// append-only, tira snapshots periódicos do engine e, no startup,
/// reaplica os segmentos de WAL por cima do snapshot mais recente.
///
/// Layout em disco no data_dir: `storage.bin` (último snapshot completo) e
/// `wal_<message_id>.bin` (segmentos, nomeados pelo id em que começam;
/// exatamente um ativo por vez).
pub struct Keeper {
    data_dir: PathBuf,
    sync_policy: SyncPolicy,
    snapshot_interval: Duration,
    core: Core,
    processor: Processor,
    wal: Mutex<WalState>,
    // Gate de requests em voo: escritas confiáveis seguram read() do
    // append até o fim da execução no engine; o snapshot segura write()
    // para não fotografar um estado com id maior que o efetivado.
    gate: RwLock<()>,
}

impl Keeper {
    pub fn new(
        core: Core,
        data_dir: impl Into<PathBuf>,
        sync_policy: SyncPolicy,
        snapshot_interval: Duration,
    ) -> Keeper {
        Keeper {
            data_dir: data_dir.into(),
            sync_policy,
            snapshot_interval,
            processor: Processor::new(core.clone()),
            core,
            wal: Mutex::new(WalState {
                message_id: 0,
                file: None,
                path: None,
                last_sync: Instant::now(),
            }),
            gate: RwLock::new(()),
        }
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Restaura o estado do engine a partir do data_dir e abre um WAL novo.
    pub async fn start(&self) -> Result<(), KeeperError> {
        fs::create_dir_all(&self.data_dir).await?;

        self.load_snapshot().await?;
        let processed = self.replay_wals().await?;

        // consolida snapshot + WALs reaplicados num snapshot novo
        let message_id = self.wal.lock().await.message_id;
        self.persist_engine(message_id).await?;

        for path in processed {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("não consegui remover WAL processado {}: {e}", path.display());
            }
        }

        let mut state = self.wal.lock().await;
        self.open_wal_locked(&mut state).await?;
        Ok(())
    }

    /// Caminho completo de uma escrita confiável: grava no WAL (com id
    /// atribuído), depois executa contra o engine. O gate de snapshot
    /// cobre as duas etapas.
    pub async fn log_and_process(&self, req: &mut Request) -> Result<Response, KeeperError> {
        let _inflight = self.gate.read().await;
        self.write_to_wal(req).await?;
        Ok(self.processor.process(req))
    }

    /// Atribui `message_id` ao request e faz o append no segmento ativo,
    /// aplicando a política de fsync. O mutex é liberado antes de o
    /// chamador executar o request contra o engine.
    pub async fn write_to_wal(&self, req: &mut Request) -> Result<(), KeeperError> {
        let mut state = self.wal.lock().await;
        let WalState {
            message_id,
            file,
            last_sync,
            ..
        } = &mut *state;

        let file = file
            .as_mut()
            .ok_or_else(|| KeeperError::Io(std::io::Error::other("WAL não está aberto")))?;

        *message_id += 1;
        req.id = *message_id;

        let mut buf = BytesMut::with_capacity(128);
        encode_request(req, &mut buf);
        file.write_all(&buf).await?;

        match self.sync_policy {
            SyncPolicy::Always => {
                file.sync_data().await?;
                *last_sync = Instant::now();
            }
            SyncPolicy::Sometimes => {
                if last_sync.elapsed() >= Duration::from_secs(1) {
                    file.sync_data().await?;
                    *last_sync = Instant::now();
                }
            }
            SyncPolicy::Never => {}
        }

        Ok(())
    }

    /// Rotação de snapshot: grava o estado atual num arquivo temporário,
    /// renomeia por cima de `storage.bin`, abre um segmento novo e apaga
    /// os segmentos supersedidos.
    pub async fn take_snapshot(&self) -> Result<(), KeeperError> {
        let _drained = self.gate.write().await;
        let mut state = self.wal.lock().await;

        self.persist_engine(state.message_id).await?;
        self.open_wal_locked(&mut state).await?;
        let current = state.path.clone();
        drop(state);

        if let Some(current) = current {
            self.remove_stale_wals(&current).await;
        }
        Ok(())
    }

    /// Loop de rotação periódica; termina no sinal de shutdown.
    pub async fn run_snapshot_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.snapshot_interval);
        tick.tick().await; // o primeiro tick dispara imediatamente

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.take_snapshot().await {
                        error!("rotação de snapshot falhou: {e}");
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Persiste um snapshot final e remove o WAL ativo (já supersedido).
    pub async fn shutdown(&self) -> Result<(), KeeperError> {
        let _drained = self.gate.write().await;
        let mut state = self.wal.lock().await;

        info!("persistindo snapshot final");
        self.persist_engine(state.message_id).await?;

        state.file = None;
        if let Some(path) = state.path.take() {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("não consegui remover o WAL ativo {}: {e}", path.display());
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<(), KeeperError> {
        let path = self.snapshot_path();
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("nenhum snapshot em {}; começando vazio", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!("carregando snapshot de {}", path.display());
        let engine = self.core.engine().clone();
        let message_id = tokio::task::spawn_blocking(move || {
            let mut src = data.as_slice();
            engine.load(&mut src)
        })
        .await
        .map_err(|e| KeeperError::Io(std::io::Error::other(e)))??;

        self.wal.lock().await.message_id = message_id;
        info!("snapshot carregado; message_id = {message_id}");
        Ok(())
    }

    async fn replay_wals(&self) -> Result<Vec<PathBuf>, KeeperError> {
        let mut segments = Vec::new();
        let mut dir = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = parse_wal_name(&name) {
                segments.push((id, entry.path()));
            }
        }
        segments.sort();

        let mut processed = Vec::with_capacity(segments.len());
        for (_, path) in segments {
            self.replay_segment(&path).await?;
            processed.push(path);
        }
        Ok(processed)
    }

    async fn replay_segment(&self, path: &Path) -> Result<(), KeeperError> {
        info!("reaplicando WAL {}", path.display());
        let data = fs::read(path).await?;
        let mut cursor = WalCursor::new(&data, path)?;

        let mut state = self.wal.lock().await;
        let mut applied = 0usize;
        loop {
            match cursor.next_request() {
                Ok(None) => break,
                Ok(Some(mut req)) => {
                    if req.id <= state.message_id {
                        // já estava no snapshot
                        continue;
                    }
                    self.processor.fix_request_ttl(&mut req)?;
                    let response = self.processor.process(&req);
                    if response.status() != Status::Ok {
                        return Err(KeeperError::ReplayFailed {
                            cmd: req.cmd,
                            id: req.id,
                            detail: format!("{response:?}"),
                        });
                    }
                    state.message_id = req.id;
                    applied += 1;
                }
                Err(KeeperError::TruncatedRecord) => {
                    warn!(
                        "registro truncado no final de {}; descartando o resto do segmento",
                        path.display()
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!("{applied} requests reaplicados de {}", path.display());
        Ok(())
    }

    /// Grava o snapshot num arquivo temporário e renomeia por cima do
    /// definitivo; uma falha no meio deixa o snapshot antigo intacto.
    async fn persist_engine(&self, message_id: u64) -> Result<(), KeeperError> {
        // remove itens vencidos para não inflar o dump
        for _ in 0..self.core.engine().shard_count() {
            self.core.collect_expired();
        }

        let engine = self.core.engine().clone();
        let temp_path = self.data_dir.join(SNAPSHOT_TEMP_FILE);
        let final_path = self.snapshot_path();

        tokio::task::spawn_blocking(move || -> Result<(), KeeperError> {
            let file = std::fs::File::create(&temp_path)?;
            let mut writer = std::io::BufWriter::new(file);
            engine.persist(&mut writer, message_id)?;
            writer.flush().map_err(KeeperError::Io)?;
            let file = writer
                .into_inner()
                .map_err(|e| KeeperError::Io(e.into_error()))?;
            file.sync_all()?;
            std::fs::rename(&temp_path, &final_path)?;
            Ok(())
        })
        .await
        .map_err(|e| KeeperError::Io(std::io::Error::other(e)))??;

        info!("snapshot gravado (message_id = {message_id})");
        Ok(())
    }

    /// Fecha o segmento atual (se houver) e abre um novo, nomeado pelo
    /// message_id seguinte.
    async fn open_wal_locked(&self, state: &mut WalState) -> Result<(), KeeperError> {
        state.message_id += 1;
        let path = self.wal_path(state.message_id);

        if fs::try_exists(&path).await? {
            return Err(KeeperError::WalExists(path));
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await?;

        let mut buf = BytesMut::with_capacity(8);
        encode_header(&mut buf);
        file.write_all(&buf).await?;

        info!("novo WAL ativo: {}", path.display());
        state.file = Some(file);
        state.path = Some(path);
        Ok(())
    }

    /// Apaga todos os segmentos exceto o ativo (pós-rotação, todos os
    /// outros são mais antigos que o snapshot recém-gravado).
    async fn remove_stale_wals(&self, keep: &Path) {
        let mut dir = match fs::read_dir(&self.data_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("não consegui listar {}: {e}", self.data_dir.display());
                return;
            }
        };
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("erro listando WALs antigos: {e}");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if parse_wal_name(&name).is_none() || entry.path() == keep {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()).await {
                warn!("não consegui remover WAL antigo {name}: {e}");
            }
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    fn wal_path(&self, message_id: u64) -> PathBuf {
        self.data_dir
            .join(format!("{WAL_PREFIX}{message_id}{WAL_SUFFIX}"))
    }
}

fn parse_wal_name(name: &str) -> Option<u64> {
    name.strip_prefix(WAL_PREFIX)?
        .strip_suffix(WAL_SUFFIX)?
        .parse()
        .ok()
}
