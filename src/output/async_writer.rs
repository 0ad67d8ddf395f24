use std::path::PathBuf;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Spawn a background task that appends every received item to `path` as
/// one JSON line. The task ends when all senders are dropped.
pub fn spawn_jsonl_writer<T>(path: PathBuf, mut rx: mpsc::Receiver<T>) -> tokio::task::JoinHandle<usize>
where
    T: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        let mut written = 0;
        let mut f = match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to open jsonl output file");
                // Keep draining so producers never block on a dead writer.
                while rx.recv().await.is_some() {}
                return 0;
            }
        };
        while let Some(item) = rx.recv().await {
            match serde_json::to_vec(&item) {
                Ok(mut line) => {
                    line.push(b'\n');
                    if let Err(e) = f.write_all(&line).await {
                        tracing::error!(error = %e, "failed to write jsonl line");
                    } else {
                        written += 1;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize jsonl item"),
            }
        }
        if let Err(e) = f.flush().await {
            tracing::error!(error = %e, "failed to flush jsonl writer");
        }
        written
    })
}
