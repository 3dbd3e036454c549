//! Application orchestrator: opens the data channel, wires the core to the
//! console and answers its prompts until the transfer finishes.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use purple_xfer::{Prompt, Transfer, Transport, XferManager, XferRole, XferStatus};
use purple_xfer_channel::wire::{read_offer, write_offer};
use purple_xfer_channel::{
    HEADER_TIMEOUT, OfferHeader, OfferListener, TCP_ACCEPT_TIMEOUT, TCP_CONNECT_TIMEOUT,
    TcpTransport, TokioEventLoop,
};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use crate::backend::TcpBackend;
use crate::config::Config;
use crate::console::{AppEvent, ConsoleNotifier, ConsoleUi};

const STATUS_POLL: Duration = Duration::from_millis(250);

/// Fallback when the peer offered no usable name.
const DEFAULT_SAVE_NAME: &str = "download.bin";

/// Final state of a finished transfer.
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub status: XferStatus,
    pub bytes: u64,
    pub path: Option<PathBuf>,
    pub sha256: Option<String>,
}

/// How prompts from the core get answered.
struct Answers {
    send_file: Option<PathBuf>,
    out: Option<PathBuf>,
    download_dir: PathBuf,
    assume_yes: bool,
}

/// Offers `file` on `bind:port` and sends it to the first peer that
/// connects.
pub async fn run_send(
    config: Config,
    file: PathBuf,
    bind: &str,
    port: Option<u16>,
    json: bool,
) -> anyhow::Result<Outcome> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let meta = std::fs::metadata(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();
    let header = OfferHeader {
        name,
        size: meta.len(),
    };

    let listener = OfferListener::bind(
        &format!("{bind}:{}", port.unwrap_or(config.port)),
        cancel.clone(),
    )
    .await?;
    let local_port = listener.port();
    eprintln!(
        "Offering {} ({}) on port {local_port}",
        header.name,
        purple_xfer::format_size(header.size)
    );

    let (mut stream, peer) = listener.accept(TCP_ACCEPT_TIMEOUT).await?;
    tokio::time::timeout(HEADER_TIMEOUT, write_offer(&mut stream, &header))
        .await
        .context("timed out sending offer header")??;
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream));

    let (manager, rx) = build_manager(&config, json);
    let xfer = manager.new_xfer(XferRole::Send, &config.account, &peer.ip().to_string());
    xfer.set_remote_address(peer.ip().to_string(), peer.port());
    xfer.set_local_port(local_port);
    let backend = Arc::new(TcpBackend::new(transport));
    xfer.set_ops(backend.clone());
    xfer.request()?;

    let answers = Answers {
        send_file: Some(file),
        out: None,
        download_dir: config.download_dir.clone(),
        assume_yes: true,
    };
    Ok(drive(&xfer, &backend, rx, answers, cancel).await)
}

/// Connects to a sender at `addr` and receives the file it offers.
pub async fn run_recv(
    config: Config,
    addr: SocketAddr,
    out: Option<PathBuf>,
    assume_yes: bool,
    json: bool,
) -> anyhow::Result<Outcome> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let mut stream = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("unable to connect to {addr}"))?;
    let header = tokio::time::timeout(HEADER_TIMEOUT, read_offer(&mut stream))
        .await
        .context("timed out waiting for offer header")??;
    tracing::info!(name = %header.name, size = header.size, %addr, "offer received");

    let local_port = stream.local_addr().map_or(0, |a| a.port());
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream));

    if out.is_none() {
        std::fs::create_dir_all(&config.download_dir).with_context(|| {
            format!("cannot create {}", config.download_dir.display())
        })?;
    }

    let (manager, rx) = build_manager(&config, json);
    let xfer = manager.new_xfer(XferRole::Receive, &config.account, &addr.ip().to_string());
    xfer.set_filename(header.name);
    xfer.set_size(header.size);
    xfer.set_remote_address(addr.ip().to_string(), addr.port());
    xfer.set_local_port(local_port);
    let backend = Arc::new(TcpBackend::new(transport));
    xfer.set_ops(backend.clone());
    xfer.request()?;

    let answers = Answers {
        send_file: None,
        out,
        download_dir: config.download_dir.clone(),
        assume_yes: assume_yes || config.auto_accept,
    };
    Ok(drive(&xfer, &backend, rx, answers, cancel).await)
}

fn build_manager(config: &Config, json: bool) -> (XferManager, UnboundedReceiver<AppEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = XferManager::builder(Arc::new(TokioEventLoop::current()))
        .ui_ops(Arc::new(ConsoleUi::new(json)))
        .notifier(Arc::new(ConsoleNotifier::new(tx.clone())))
        .config(config.buffer)
        .build();
    manager.signals().connect_all(move |signal, _xfer| {
        let _ = tx.send(AppEvent::Signal(signal));
    });
    (manager, rx)
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

async fn drive(
    xfer: &Arc<Transfer>,
    backend: &TcpBackend,
    mut rx: UnboundedReceiver<AppEvent>,
    mut answers: Answers,
    cancel: CancellationToken,
) -> Outcome {
    let mut poll = tokio::time::interval(STATUS_POLL);

    while !xfer.status().is_terminal() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                xfer.cancel_local();
                break;
            }
            event = rx.recv() => match event {
                Some(AppEvent::Prompt(_, prompt)) => {
                    answer(xfer, prompt, &mut answers, &cancel).await;
                }
                Some(AppEvent::Signal(signal)) => {
                    tracing::debug!(xfer = %xfer.id(), signal = signal.name(), "signal");
                }
                None => break,
            },
            _ = poll.tick() => {}
        }
    }

    Outcome {
        status: xfer.status(),
        bytes: xfer.bytes_transferred(),
        path: xfer.local_path(),
        sha256: backend.digest(),
    }
}

async fn answer(
    xfer: &Transfer,
    prompt: Prompt,
    answers: &mut Answers,
    cancel: &CancellationToken,
) {
    let result = match prompt {
        // Offered once; asking again means the file was rejected.
        Prompt::ChooseFile { save: false, .. } => {
            let file = answers.send_file.take();
            xfer.respond_file(file.as_deref())
        }
        Prompt::ChooseFile { save: true, suggested } => {
            let path = save_path(
                answers.out.as_deref(),
                &answers.download_dir,
                suggested.as_deref(),
            );
            xfer.respond_file(Some(&path))
        }
        Prompt::Offer { primary, .. } => {
            let yes = answers.assume_yes || confirm(primary, cancel).await;
            xfer.respond_accept(yes)
        }
        Prompt::Accept { primary, secondary } => {
            let question = match secondary {
                Some(secondary) => format!("{primary}\n{secondary}"),
                None => primary,
            };
            let yes = answers.assume_yes || confirm(question, cancel).await;
            xfer.respond_accept(yes)
        }
    };
    if let Err(e) = result {
        tracing::warn!(xfer = %xfer.id(), error = %e, "prompt answer rejected");
    }
}

/// Asks on the terminal; anything but an explicit yes declines.
async fn confirm(question: String, cancel: &CancellationToken) -> bool {
    let ask = tokio::task::spawn_blocking(move || {
        eprint!("{question} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes" | "Yes")
    });
    tokio::select! {
        _ = cancel.cancelled() => false,
        answer = ask => answer.unwrap_or(false),
    }
}

/// Picks where a received file is written.
///
/// An explicit `out` directory gets the suggested name appended; any other
/// `out` is used as is. Without `out` the file lands in `download_dir`.
pub fn save_path(out: Option<&Path>, download_dir: &Path, suggested: Option<&str>) -> PathBuf {
    let name = suggested
        .filter(|n| purple_xfer::validate_remote_filename(n).is_ok())
        .unwrap_or(DEFAULT_SAVE_NAME);
    match out {
        Some(out) if out.is_dir() => out.join(name),
        Some(out) => out.to_path_buf(),
        None => download_dir.join(name),
    }
}
