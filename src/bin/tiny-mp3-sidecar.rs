use std::io::{self, BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tiny_mp3_core::batch::{BatchEvent, BatchEventEmitter};
use tiny_mp3_core::error::AppError;
use tiny_mp3_core::logging::init_logging;
use tiny_mp3_core::settings::{SettingsStore, default_settings_path};
use tiny_mp3_core::sidecar_api::Sidecar;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

impl From<&AppError> for RpcErrorPayload {
    fn from(err: &AppError) -> Self {
        Self {
            summary: err.summary(),
            detail: err.detail(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent<'a> {
    event: &'a str,
    payload: Value,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn write_failure(writer: &SharedWriter, id: u64, error: RpcErrorPayload) {
    let _ = write_json_line_shared(writer, &RpcFailure { id, error });
}

fn event_emitter(writer: &SharedWriter) -> BatchEventEmitter {
    let writer = Arc::clone(writer);
    Arc::new(move |event: &BatchEvent| {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!(
                    target: "tiny_mp3::sidecar",
                    "Failed to serialize {}: {}",
                    event.name(),
                    e
                );
                return;
            }
        };
        let message = RpcEvent {
            event: event.name(),
            payload,
        };
        if let Err(e) = write_json_line_shared(&writer, &message) {
            log::warn!(target: "tiny_mp3::sidecar", "Failed to write event: {}", e);
        }
    })
}

fn handle_request(request: RpcRequest, sidecar: &Sidecar, writer: &SharedWriter) {
    match sidecar.dispatch(&request.method, request.params) {
        Ok(result) => {
            let response = RpcSuccess {
                id: request.id,
                result,
            };
            if let Err(e) = write_json_line_shared(writer, &response) {
                write_failure(
                    writer,
                    request.id,
                    RpcErrorPayload {
                        summary: "Serialization error".to_string(),
                        detail: e.to_string(),
                    },
                );
            }
        }
        Err(err) => {
            log::debug!(
                target: "tiny_mp3::sidecar",
                "{} failed: {}",
                request.method,
                err
            );
            write_failure(writer, request.id, RpcErrorPayload::from(&err));
        }
    }
}

fn main() -> io::Result<()> {
    init_logging();

    let settings_path = default_settings_path();
    log::info!(
        target: "tiny_mp3::sidecar",
        "tiny-mp3 sidecar {} starting (settings: {})",
        env!("CARGO_PKG_VERSION"),
        settings_path.display()
    );

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let sidecar = Sidecar::new(SettingsStore::open(settings_path), event_emitter(&stdout));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                write_failure(
                    &stdout,
                    0,
                    RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                );
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_failure(
                    &stdout,
                    0,
                    RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                );
                continue;
            }
        };

        handle_request(request, &sidecar, &stdout);
    }

    log::info!(target: "tiny_mp3::sidecar", "stdin closed, shutting down");
    sidecar.shutdown();
    Ok(())
}
