//! Thin JSON-RPC client, connecting to a running `semantica-daemon`
//! over the same transport it listens on (spec.md §6: "transport-
//! agnostic; one request/response per call").

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::protocol::{Request, Response};

/// Send a single request and return its result value, or an error built
/// from the daemon's error response.
pub async fn call(pipe_name: &str, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
    let mut line = serde_json::to_string(&Request::new(method, params))?;
    line.push('\n');

    #[cfg(windows)]
    let (reader, mut writer) = {
        use tokio::net::windows::named_pipe::ClientOptions;
        let client = ClientOptions::new().open(pipe_name).map_err(|e| {
            anyhow!("could not connect to daemon at {pipe_name}: {e} (is `semantica-daemon` running?)")
        })?;
        tokio::io::split(client)
    };

    #[cfg(not(windows))]
    let (reader, mut writer) = {
        use tokio::net::UnixStream;
        let stream = UnixStream::connect(pipe_name).await.map_err(|e| {
            anyhow!("could not connect to daemon at {pipe_name}: {e} (is `semantica-daemon` running?)")
        })?;
        tokio::io::split(stream)
    };

    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    // Skip any push notifications that arrive before the matching response;
    // a one-shot CLI call has no subscriber for `stage`/`indexer:progress`.
    loop {
        let Some(raw) = lines.next_line().await? else {
            bail!("daemon closed the connection without responding");
        };
        let response: Response = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if let Some(err) = response.error {
            bail!("{} (code {})", err.message, err.code);
        }
        return Ok(response.result.unwrap_or(serde_json::Value::Null));
    }
}
