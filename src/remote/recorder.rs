use super::uri::RecorderUri;
use crate::config::RemoteConfig;
use crate::error::{Result, StbtError, TransportError};
use crate::protocol::{decode_lirc_line, decode_vr_key, VrCodec, LIRC_MAX_LINE, VR_MAX_RECORD};
use futures::stream::{BoxStream, StreamExt};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, UnixStream};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info};

/// Lazy, single-pass sequence of recorded key names.
///
/// Ends when the transport closes; a read failure is yielded once as an
/// error item.
pub type KeyStream = BoxStream<'static, Result<String>>;

/// Path that makes the file recorder read the process's standard input
pub const STDIN_PATH: &str = "/dev/stdin";

/// Build the recorder described by `uri` and wait until it is producing.
///
/// For `vr:` this blocks until a virtual remote connects.
pub async fn uri_to_remote_recorder(uri: &str, config: &RemoteConfig) -> Result<KeyStream> {
    let parsed: RecorderUri = uri.parse()?;
    debug!("Recorder URI {} parsed as {:?}", uri, parsed);

    match parsed {
        RecorderUri::VirtualRemote { host, port } => {
            VirtualRemoteListener::bind(&host, port).await?.accept().await
        }
        RecorderUri::Lirc { socket, remote } => {
            lirc_remote_listen(&socket, &remote, config.connect_timeout()?).await
        }
        RecorderUri::File(path) => file_remote_recorder(&path).await,
    }
}

/// TCP listener waiting for a single virtual remote to connect
pub struct VirtualRemoteListener {
    listener: TcpListener,
    address: SocketAddr,
}

impl VirtualRemoteListener {
    /// Bind the listening socket; an empty host listens on every interface
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let address = format!("{}:{}", host, port);

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::BindFailed {
                address: address.clone(),
                source,
            })?;
        let address = listener.local_addr()?;

        Ok(Self { listener, address })
    }

    /// Address actually bound, useful after binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Accept exactly one connection and decode its key presses
    pub async fn accept(self) -> Result<KeyStream> {
        info!(
            "Waiting for connection from virtual remote control on {}...",
            self.address
        );
        let (connection, peer) =
            self.listener
                .accept()
                .await
                .map_err(|source| TransportError::AcceptFailed {
                    address: self.address.to_string(),
                    source,
                })?;
        info!("Accepted connection from {}", peer);

        let endpoint = format!("virtual remote {}", peer);
        Ok(FramedRead::new(connection, VrCodec::with_max_length(VR_MAX_RECORD))
            .filter_map(move |item| {
                futures::future::ready(match item {
                    Ok(record) => decode_vr_key(record).map(Ok),
                    Err(e) => Some(Err(read_failed(&endpoint, e))),
                })
            })
            .boxed())
    }
}

/// Connect to lircd and yield the keys pressed on the named remote
pub async fn lirc_remote_listen(socket: &Path, remote: &str, timeout: Duration) -> Result<KeyStream> {
    let endpoint = format!("Lirc socket {}", socket.display());
    debug!("control-recorder connecting to lirc socket '{}'...", socket.display());

    let stream = match tokio::time::timeout(timeout, UnixStream::connect(socket)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::ConnectFailed { endpoint, source }.into()),
        Err(_) => return Err(TransportError::ConnectTimeout { endpoint, timeout }.into()),
    };
    debug!("control-recorder connected to lirc socket");

    let remote = remote.to_string();
    Ok(
        FramedRead::new(stream, LinesCodec::new_with_max_length(LIRC_MAX_LINE))
            .filter_map(move |item| {
                futures::future::ready(match item {
                    Ok(line) => decode_lirc_line(&line, &remote).map(Ok),
                    Err(e) => Some(Err(read_failed(&endpoint, e))),
                })
            })
            .boxed(),
    )
}

/// Replay key names from a file or pipe, one per line.
///
/// Trailing whitespace is trimmed and blank lines are skipped. The sequence
/// ends at end-of-file; [`STDIN_PATH`] reads standard input interactively.
pub async fn file_remote_recorder(path: &Path) -> Result<KeyStream> {
    let reader: Box<dyn AsyncRead + Send + Unpin> = if path == Path::new(STDIN_PATH) {
        info!("Waiting for keypresses from standard input...");
        Box::new(tokio::io::stdin())
    } else {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            StbtError::configuration(format!(
                "Failed to open recorder file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Box::new(file)
    };

    let endpoint = path.display().to_string();
    Ok(FramedRead::new(reader, LinesCodec::new())
        .filter_map(move |item| {
            futures::future::ready(match item {
                Ok(line) => {
                    let key = line.trim_end();
                    (!key.is_empty()).then(|| Ok(key.to_string()))
                }
                Err(e) => Some(Err(read_failed(&endpoint, e))),
            })
        })
        .boxed())
}

fn read_failed<E: std::fmt::Display>(endpoint: &str, error: E) -> StbtError {
    TransportError::ReadFailed {
        endpoint: endpoint.to_string(),
        details: error.to_string(),
    }
    .into()
}
