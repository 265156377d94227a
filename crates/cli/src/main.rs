use std::io::{self, Write};
use std::process::ExitCode;

use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use squalldb_common::{DEFAULT_HOST, DEFAULT_PORT};
use squalldb_protocol::Frame;

/// Comandos do servidor com aridade, para o `help` local do REPL.
const COMMAND_HELP: &[(&str, &str)] = &[
    ("GET chave", "lê o valor de bytes de uma chave"),
    ("SET chave valor", "grava bytes, descartando valor e TTL anteriores"),
    ("SETEX chave segundos valor", "grava bytes com prazo de expiração"),
    ("DEL chave [chave ...]", "remove chaves; responde quantas existiam"),
    ("KEYS padrão", "chaves vivas que casam o glob (* e ?)"),
    ("EXPIRE chave segundos", "define TTL numa chave viva (<= 0 remove)"),
    ("PERSIST chave", "tira o TTL de uma chave volátil"),
    ("TTL chave", "segundos restantes; -1 sem TTL, -2 inexistente"),
    ("DSET chave campo valor", "grava um campo; 1 se o campo é novo"),
    ("DGET chave campo", "lê um campo de dict"),
    ("DKEYS chave", "lista os campos de um dict"),
    ("DGETALL chave", "pares campo/valor de um dict"),
    ("DDEL chave campo [campo ...]", "remove campos de um dict"),
    ("LPUSH chave valor [valor ...]", "empilha no head; o último vira head"),
    ("LPOP chave", "remove e devolve o head"),
    ("LRANGE chave início fim", "fatia inclusiva; índices negativos valem"),
    ("LINDEX chave índice", "elemento numa posição"),
    ("LSET chave índice valor", "sobrescreve uma posição existente"),
    ("LLEN chave", "comprimento da lista; 0 se não existe"),
    ("PING", "responde PONG"),
    ("QUIT", "encerra a conexão"),
];

#[derive(Parser, Debug)]
#[command(
    name = "squalldb-cli",
    about = "Cliente RESP do SqualldB",
    after_help = "Sem comando entra no modo interativo; lá, `help` lista os comandos."
)]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Imprime só os payloads, um elemento por linha (para scripts);
    /// respostas de erro vão para stderr e viram exit code de falha
    #[arg(long)]
    raw: bool,

    /// Comando único para executar (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

/// Conexão com o servidor; `pending` guarda bytes de resposta que
/// chegaram além do frame corrente.
struct Client {
    stream: TcpStream,
    pending: BytesMut,
}

impl Client {
    async fn connect(addr: &str) -> anyhow::Result<Client> {
        Ok(Client {
            stream: TcpStream::connect(addr).await?,
            pending: BytesMut::with_capacity(4096),
        })
    }

    async fn roundtrip(&mut self, words: &[String]) -> anyhow::Result<Frame> {
        let parts: Vec<&str> = words.iter().map(String::as_str).collect();
        let mut out = BytesMut::new();
        Frame::command(&parts).encode(&mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        loop {
            let mut cursor = std::io::Cursor::new(&self.pending[..]);
            if Frame::check(&mut cursor).is_ok() {
                let end = cursor.position() as usize;
                cursor.set_position(0);
                let reply = Frame::parse(&mut cursor)
                    .map_err(|e| anyhow::anyhow!("resposta malformada: {e}"))?;
                let _ = self.pending.split_to(end);
                return Ok(reply);
            }
            if self.stream.read_buf(&mut self.pending).await? == 0 {
                anyhow::bail!("servidor fechou a conexão");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let mut client = Client::connect(&addr).await?;

    if !args.command.is_empty() {
        let reply = client.roundtrip(&args.command).await?;
        return Ok(report(&reply, args.raw));
    }

    println!("SqualldB em {addr} — `help` lista os comandos, `quit` sai");
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("{addr}> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }

        let words = match split_command(input) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("(sintaxe) {e}");
                continue;
            }
        };

        match client.roundtrip(&words).await {
            Ok(reply) => {
                report(&reply, args.raw);
            }
            Err(e) => {
                // conexão caiu no meio; reconecta e repete uma vez
                eprintln!("(conexão perdida: {e}) reconectando em {addr}...");
                client = Client::connect(&addr).await?;
                let reply = client.roundtrip(&words).await?;
                report(&reply, args.raw);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_help() {
    println!("comandos do SqualldB:");
    for (syntax, effect) in COMMAND_HELP {
        println!("  {syntax:<30} {effect}");
    }
}

/// Imprime a resposta e devolve o exit code correspondente.
fn report(reply: &Frame, raw: bool) -> ExitCode {
    if raw {
        if let Frame::Error(msg) = reply {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
        print!("{}", render_raw(reply));
    } else {
        println!("{}", render_pretty(reply, 0));
    }
    ExitCode::SUCCESS
}

/// Modo script: só payloads, um elemento por linha, nada de anotação.
fn render_raw(reply: &Frame) -> String {
    match reply {
        Frame::Simple(s) => format!("{s}\n"),
        Frame::Error(msg) => format!("{msg}\n"),
        Frame::Integer(n) => format!("{n}\n"),
        Frame::Bulk(data) => format!("{}\n", String::from_utf8_lossy(data)),
        Frame::Null => "\n".to_string(),
        Frame::Array(items) => items.iter().map(render_raw).collect(),
    }
}

/// Modo interativo: escalares anotados, arrays numerados, aninhamento
/// com indentação de dois espaços por nível.
fn render_pretty(reply: &Frame, depth: usize) -> String {
    let pad = "  ".repeat(depth);
    match reply {
        Frame::Simple(s) => format!("{pad}{s}"),
        Frame::Error(msg) => format!("{pad}(erro) {msg}"),
        Frame::Integer(n) => format!("{pad}(int) {n}"),
        Frame::Null => format!("{pad}(nulo)"),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("{pad}\"{s}\""),
            Err(_) => format!("{pad}({} bytes binários)", data.len()),
        },
        Frame::Array(items) if items.is_empty() => format!("{pad}(array vazio)"),
        Frame::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Frame::Array(_) => {
                    format!("{pad}{})\n{}", i + 1, render_pretty(item, depth + 1))
                }
                _ => format!("{pad}{}) {}", i + 1, render_pretty(item, 0)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Divide a linha em palavras. Aspas simples são literais; aspas duplas
/// aceitam os escapes \n, \t, \r, \" e \\. Aspas sem fechamento são erro
/// de sintaxe, não um argumento silenciosamente colado.
fn split_command(input: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if started {
                    words.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            '\'' => {
                started = true;
                loop {
                    match chars.next() {
                        None => return Err("aspas simples sem fechamento".to_string()),
                        Some('\'') => break,
                        Some(c) => current.push(c),
                    }
                }
            }
            '"' => {
                started = true;
                loop {
                    match chars.next() {
                        None => return Err("aspas duplas sem fechamento".to_string()),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars
                                .next()
                                .ok_or_else(|| "escape no fim da linha".to_string())?;
                            current.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other, // \" e \\ caem aqui
                            });
                        }
                        Some(c) => current.push(c),
                    }
                }
            }
            c => {
                started = true;
                current.push(c);
            }
        }
    }

    if started {
        words.push(current);
    }
    Ok(words)
}
