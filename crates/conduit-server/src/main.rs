//! Binary entry point: stdio transport loop over the assembled [`conduit_server::App`].
//!
//! Each line is dispatched on its own spawned task so the concurrency
//! semaphore in `conduit-resources` actually bounds *parallel* tool
//! invocations rather than a queue of them: the reader keeps pulling lines
//! off stdin while earlier calls are still in flight. Responses are
//! written in completion order, not request order, over a single writer
//! task fed by a channel.

use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use conduit_protocol::Transport;
use conduit_server::{build, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    ).init();

    let app = build(&Config::default(), Transport::Stdio);
    let dispatcher = app.dispatcher.clone();
    let connection_closed = CancellationToken::new();

    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        let mut writer = stdout();
        while let Some(line) = response_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(stdin());
    let mut line = String::new();
    let mut in_flight = JoinSet::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            res = reader.read_line(&mut line) => match res {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed");
                    break;
                }
            },
            () = connection_closed.cancelled() => break,
        };
        if bytes_read == 0 {
            break;
        }

        let trimmed = line.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }

        let dispatcher = dispatcher.clone();
        let call_closed = connection_closed.clone();
        let response_tx = response_tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = dispatcher.dispatch(&trimmed, call_closed).await {
                let _ = response_tx.send(response);
            }
        });
    }

    connection_closed.cancel();
    dispatcher.close();

    let drain = async {
        while in_flight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(app.shutdown_timeout, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed with handlers still in flight");
    }

    drop(response_tx);
    let _ = writer_task.await;
}
