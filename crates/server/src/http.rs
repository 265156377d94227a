use std::collections::HashMap;

use axum::Router;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use bytes::Bytes;

use squalldb_common::MAX_FRAME_SIZE;
use squalldb_protocol::{Request, Response, Status};

use crate::Dispatcher;

/// Prefixo dos headers que viram entradas no meta do request.
const META_HEADER_PREFIX: &str = "x-squall-";

/// Boundary fixo das respostas multipart.
const PART_BOUNDARY: &str = "squalldb-part";

/// Front-end HTTP: `/COMANDO/arg1/arg2/…`, com o corpo (simples ou
/// multipart) fornecendo os argumentos finais em bytes.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new().fallback(handle).with_state(dispatcher)
}

async fn handle(
    State(dispatcher): State<Dispatcher>,
    request: axum::extract::Request,
) -> HttpResponse {
    match serve(dispatcher, request).await {
        Ok(response) => response,
        Err(message) => (
            StatusCode::BAD_REQUEST,
            format!("erro processando o request: {message}"),
        )
            .into_response(),
    }
}

async fn serve(
    dispatcher: Dispatcher,
    request: axum::extract::Request,
) -> Result<HttpResponse, String> {
    let (cmd, mut args) =
        parse_path(request.uri().path()).ok_or("URL deve ser /COMANDO/arg1/…")?;
    let meta = parse_meta(request.headers());

    if is_multipart(request.headers()) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| e.to_string())?;
        while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
            args.push(field.bytes().await.map_err(|e| e.to_string())?);
        }
    } else {
        let payload = axum::body::to_bytes(request.into_body(), MAX_FRAME_SIZE)
            .await
            .map_err(|e| e.to_string())?;
        if !payload.is_empty() {
            args.push(payload);
        }
    }

    let mut req = Request::new(cmd, args).with_meta(meta);
    let response = dispatcher.handle(&mut req).await;
    Ok(render(response))
}

/// Decompõe o path em (comando, argumentos).
fn parse_path(path: &str) -> Option<(String, Vec<Bytes>)> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let cmd = segments.next()?.to_string();
    let args = segments
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .collect();
    Some((cmd, args))
}

fn parse_meta(headers: &HeaderMap) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if let Some(key) = name.strip_prefix(META_HEADER_PREFIX)
            && let Ok(value) = value.to_str()
        {
            meta.insert(key.to_string(), value.to_string());
        }
    }
    meta
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/"))
        .unwrap_or(false)
}

/// Mapeia a resposta neutra para HTTP: status Ok=200, NotFound=404,
/// demais=500; respostas-array viram multipart com partes text/plain;
/// escalares vão direto no corpo.
fn render(response: Response) -> HttpResponse {
    match response {
        Response::Status { status, payload } => {
            (http_status(status), payload).into_response()
        }
        Response::String { payload } => (StatusCode::OK, payload).into_response(),
        Response::Int { payload } => (StatusCode::OK, payload.to_string()).into_response(),
        Response::StringSlice { payload } => {
            let content_type = format!("multipart/form-data; boundary={PART_BOUNDARY}");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                Body::from(multipart_body(&payload)),
            )
                .into_response()
        }
    }
}

fn http_status(status: Status) -> StatusCode {
    match status {
        Status::Ok => StatusCode::OK,
        Status::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn multipart_body(parts: &[Bytes]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(
            format!("--{PART_BOUNDARY}\r\nContent-Type: text/plain\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{PART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_decomposes_into_command_and_args() {
        let (cmd, args) = parse_path("/SETEX/chave/10").unwrap();
        assert_eq!(cmd, "SETEX");
        assert_eq!(args, vec![Bytes::from("chave"), Bytes::from("10")]);

        let (cmd, args) = parse_path("/KEYS/*").unwrap();
        assert_eq!(cmd, "KEYS");
        assert_eq!(args, vec![Bytes::from("*")]);

        assert!(parse_path("/").is_none());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(http_status(Status::Ok), StatusCode::OK);
        assert_eq!(http_status(Status::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            http_status(Status::TypeMismatch),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            http_status(Status::InvalidCommand),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn multipart_body_frames_every_part() {
        let body = multipart_body(&[Bytes::from("um"), Bytes::from("dois")]);
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.matches("--squalldb-part\r\n").count(), 2);
        assert!(text.contains("Content-Type: text/plain\r\n\r\num\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n\r\ndois\r\n"));
        assert!(text.ends_with("--squalldb-part--\r\n"));
    }

    #[test]
    fn meta_headers_are_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-squall-origem", "teste".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());

        let meta = parse_meta(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["origem"], "teste");
    }
}
