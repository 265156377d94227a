use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error};

use squalldb_common::ConnectionError;
use squalldb_keeper::{Keeper, is_write_command};
use squalldb_protocol::{Frame, Request, Response, Status};

use crate::Connection;

/// Roteia requests vindos dos front-ends: escritas confiáveis passam
/// pelo WAL do Keeper antes de executar; leituras e requests unreliable
/// vão direto ao processor.
#[derive(Clone)]
pub struct Dispatcher {
    keeper: Arc<Keeper>,
}

impl Dispatcher {
    pub fn new(keeper: Arc<Keeper>) -> Dispatcher {
        Dispatcher { keeper }
    }

    pub async fn handle(&self, req: &mut Request) -> Response {
        if is_write_command(&req.cmd) && !req.unreliable {
            match self.keeper.log_and_process(req).await {
                Ok(response) => response,
                Err(e) => {
                    error!("falha de persistência no comando {}: {e}", req.cmd);
                    Response::error(format!("persistence failure: {e}"))
                }
            }
        } else {
            self.keeper.processor().process(req)
        }
    }
}

/// Loop principal de tratamento de uma conexão RESP.
pub async fn handle_connection(
    mut conn: Connection,
    dispatcher: Dispatcher,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    loop {
        let frame = tokio::select! {
            result = conn.read_frame() => result?,
            _ = shutdown.recv() => return Ok(()),
        };

        let Some(frame) = frame else {
            return Ok(()); // EOF
        };

        // Drena o que já chegou completo: mais de um request no buffer
        // caracteriza um pipeline, processado em ordem mas sem WAL.
        let mut batch = vec![frame];
        while let Some(extra) = conn.try_read_buffered()? {
            batch.push(extra);
        }
        let unreliable = batch.len() > 1;

        for frame in batch {
            if !process_frame(&mut conn, &dispatcher, frame, unreliable).await? {
                return Ok(());
            }
        }
    }
}

/// Processa um frame; retorna false quando a conexão deve fechar (QUIT).
async fn process_frame(
    conn: &mut Connection,
    dispatcher: &Dispatcher,
    frame: Frame,
    unreliable: bool,
) -> Result<bool, ConnectionError> {
    let mut req = match request_from_frame(frame) {
        Ok(req) => req,
        Err(msg) => {
            conn.write_frame(&Frame::Error(format!("ERR {msg}"))).await?;
            return Ok(true);
        }
    };

    // comandos de serviço resolvidos na borda RESP
    match req.cmd.as_str() {
        "PING" => {
            conn.write_frame(&Frame::Simple("PONG".into())).await?;
            return Ok(true);
        }
        "QUIT" => {
            conn.write_frame(&Frame::Simple("OK".into())).await?;
            return Ok(false);
        }
        _ => {}
    }

    req.unreliable = unreliable;
    debug!("request: {} ({} args)", req.cmd, req.args.len());

    let response = dispatcher.handle(&mut req).await;
    conn.write_frame(&response_to_frame(response)).await?;
    Ok(true)
}

/// Converte um array RESP num request: primeiro elemento é o nome do
/// comando (uppercased), o resto vira argumentos crus.
fn request_from_frame(frame: Frame) -> Result<Request, String> {
    let Frame::Array(parts) = frame else {
        return Err("esperado array de comando".to_string());
    };

    let mut parts = parts.into_iter();
    let cmd = match parts.next() {
        Some(Frame::Bulk(raw)) => String::from_utf8(raw.to_vec())
            .map_err(|_| "nome de comando inválido".to_string())?,
        Some(Frame::Simple(s)) => s,
        _ => return Err("comando vazio".to_string()),
    };

    let mut args = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Frame::Bulk(raw) => args.push(raw),
            Frame::Simple(s) => args.push(Bytes::from(s.into_bytes())),
            Frame::Integer(n) => args.push(Bytes::from(n.to_string())),
            _ => return Err("argumento de comando inválido".to_string()),
        }
    }

    Ok(Request::new(cmd, args))
}

/// Mapeia a resposta neutra para o wire RESP.
fn response_to_frame(response: Response) -> Frame {
    match response {
        Response::Status { status, payload } => match status {
            Status::Ok => Frame::Simple("OK".into()),
            Status::NotFound => Frame::Null,
            Status::TypeMismatch => Frame::Error(
                "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
            ),
            _ => Frame::Error(format!("ERR {payload}")),
        },
        Response::String { payload } => Frame::Bulk(payload),
        Response::StringSlice { payload } => {
            Frame::Array(payload.into_iter().map(Frame::Bulk).collect())
        }
        Response::Int { payload } => Frame::Integer(payload),
    }
}
