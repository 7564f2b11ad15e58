//! Stdio transport: line-delimited JSON-RPC over stdin/stdout.
//!
//! One request per stdin line, one response per stdout line, strictly
//! serial. Lines beyond the 1 MiB scanner limit answer with `-32600`;
//! smaller malformed payloads answer with `-32700`. EOF on stdin is the
//! canonical shutdown signal and is not an error. Log output belongs on
//! stderr only.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, trace};

use hyperserve_jsonrpc::{JsonRpcEngine, JsonRpcErrorCode, JsonRpcResponse};

use crate::error::{McpError, McpResult};

/// Scanner limit: one line may not exceed 1 MiB
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Initial read-buffer allocation
pub const INITIAL_BUFFER_BYTES: usize = 64 * 1024;

/// Stdio transport over the shared JSON-RPC engine
#[derive(Clone)]
pub struct StdioTransport {
    engine: Arc<JsonRpcEngine>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Create a transport over `engine`
    pub fn new(engine: Arc<JsonRpcEngine>) -> Self {
        Self { engine }
    }

    /// Run over the process's stdin/stdout until EOF
    pub async fn run(&self) -> McpResult<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Run over arbitrary streams (testing, supervised subprocesses).
    ///
    /// The loop is strictly request → response with one message in flight;
    /// owning both the decoder and encoder in a single task is what keeps
    /// interleaved output from corrupting the line framing.
    pub async fn run_with<R, W>(&self, input: R, output: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = FramedRead::with_capacity(
            BufReader::new(input),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            INITIAL_BUFFER_BYTES,
        );
        let mut writer = FramedWrite::new(output, LinesCodec::new());

        while let Some(next) = reader.next().await {
            match next {
                Ok(line) => {
                    trace!(bytes = line.len(), "stdio request line");
                    if let Some(response) = self.engine.process_bytes(line.as_bytes()).await {
                        let encoded = serde_json::to_string(&response)?;
                        writer
                            .send(encoded)
                            .await
                            .map_err(|e| McpError::Transport(e.to_string()))?;
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // Scanner errors answer -32600; the codec discards the
                    // rest of the oversized line and the loop continues.
                    debug!("stdio line exceeded scanner limit");
                    let response = JsonRpcResponse::error(
                        JsonRpcErrorCode::InvalidRequest.into(),
                        None,
                    );
                    let encoded = serde_json::to_string(&response)?;
                    writer
                        .send(encoded)
                        .await
                        .map_err(|e| McpError::Transport(e.to_string()))?;
                }
                Err(LinesCodecError::Io(e)) => return Err(McpError::Io(e)),
            }
        }
        debug!("stdin closed, stdio transport exiting");
        Ok(())
    }
}
