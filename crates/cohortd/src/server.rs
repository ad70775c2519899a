//! Newline-delimited-JSON socket front end.
//!
//! One OS thread per connection; each line is one request, answered in
//! order on the same stream. The registry and dispatch layers below are
//! fully concurrent, so connections never serialize against each other
//! except on the registry lock.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::{Context, Result};
use cohort_contracts::{validate_request, Request, Response, Status};

use crate::service::ExecutorService;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Upper bound on one request line, in bytes. Oversized lines fail the
    /// connection rather than buffering without limit.
    pub max_request_bytes: usize,
}

pub fn serve(service: Arc<ExecutorService>, config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .with_context(|| format!("bind {}", config.listen))?;
    eprintln!("cohortd: listening on {}", config.listen);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                eprintln!("cohortd: accept failed: {err}");
                continue;
            }
        };
        let service = Arc::clone(&service);
        let max_request_bytes = config.max_request_bytes;
        std::thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(err) = handle_connection(&service, stream, max_request_bytes) {
                eprintln!("cohortd: connection {peer}: {err:#}");
            }
        });
    }
    Ok(())
}

fn handle_connection(
    service: &ExecutorService,
    stream: TcpStream,
    max_request_bytes: usize,
) -> Result<()> {
    let reader = stream.try_clone().context("clone stream")?;
    serve_stream(service, reader, stream, max_request_bytes)
}

/// The per-connection request loop, over any byte stream.
///
/// The socket side is capped with [`Read::take`] so an oversized line is
/// rejected after at most `max_request_bytes` bytes have been pulled off
/// the wire, not after the whole line has been buffered. The limit counts
/// the trailing newline; it is re-armed before every line.
pub fn serve_stream<R: Read, W: Write>(
    service: &ExecutorService,
    reader: R,
    mut writer: W,
    max_request_bytes: usize,
) -> Result<()> {
    let mut reader = BufReader::new(reader.take(0));
    let mut line = String::new();

    loop {
        line.clear();
        reader.get_mut().set_limit(max_request_bytes as u64);
        let n = reader.read_line(&mut line).context("read request line")?;
        if n == 0 {
            return Ok(());
        }
        if !line.ends_with('\n') && line.len() >= max_request_bytes {
            let response = Response::err(
                0,
                Status::invalid_argument(format!(
                    "request line exceeds the {max_request_bytes} byte limit"
                )),
            );
            write_response(&mut writer, &response)?;
            anyhow::bail!("request line exceeded {max_request_bytes} bytes");
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(service, &line);
        write_response(&mut writer, &response)?;
    }
}

pub fn handle_line(service: &ExecutorService, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return Response::err(
                0,
                Status::invalid_argument(format!("malformed request: {err}")),
            )
        }
    };
    if let Err(status) = validate_request(&request) {
        return Response::err(request.seq, status);
    }
    match service.handle(&request.op) {
        Ok(payload) => Response::ok(request.seq, payload),
        Err(status) => Response::err(request.seq, status),
    }
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let mut bytes = serde_json::to_vec(response).context("encode response")?;
    bytes.push(b'\n');
    writer.write_all(&bytes).context("write response")?;
    writer.flush().context("flush response")?;
    Ok(())
}
