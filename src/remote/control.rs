use super::uri::ControlUri;
use crate::capture::SharedSource;
use crate::config::RemoteConfig;
use crate::error::{Result, StbtError, TransportError};
use crate::protocol::{encode_lirc_press, encode_vr_press};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info};

/// Highest pattern number the test-pattern control accepts
pub const MAX_TEST_PATTERN: u8 = 20;

/// Something that can press keys on the device under test
#[async_trait]
pub trait RemoteControl: Send {
    /// Press and release one key
    async fn press(&mut self, key: &str) -> Result<()>;

    /// Release the transport; later presses fail
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Scheme name, for log messages
    fn name(&self) -> &'static str;
}

/// Build the remote control described by `uri`.
///
/// `source` is only consulted by the `test` control, which drives the
/// capture pipeline's pattern generator instead of a real device.
pub async fn uri_to_remote(
    uri: &str,
    source: Option<&SharedSource>,
    config: &RemoteConfig,
) -> Result<Box<dyn RemoteControl>> {
    let parsed: ControlUri = uri.parse()?;
    debug!("Remote control URI {} parsed as {:?}", uri, parsed);

    let remote: Box<dyn RemoteControl> = match parsed {
        ControlUri::None => Box::new(NullRemote),
        ControlUri::Test => {
            let source = source.ok_or_else(|| {
                StbtError::configuration(
                    "The \"test\" control can only be used with a test-pattern source pipeline",
                )
            })?;
            Box::new(TestPatternRemote::new(source.clone()).await?)
        }
        ControlUri::VirtualRemote { host, port } => {
            Box::new(VirtualRemote::connect(&host, port, config.connect_timeout()?).await?)
        }
        ControlUri::Lirc { socket, remote } => {
            Box::new(LircRemote::connect(&socket, &remote, config.connect_timeout()?).await?)
        }
    };
    Ok(remote)
}

/// Control used when nothing is wired up; presses are only logged
#[derive(Debug, Default)]
pub struct NullRemote;

#[async_trait]
impl RemoteControl for NullRemote {
    async fn press(&mut self, key: &str) -> Result<()> {
        debug!("NullRemote: Ignoring request to press \"{}\"", key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Control used by self-tests: switches the source's test pattern
/// ("0" to "20") instead of pressing anything
pub struct TestPatternRemote {
    source: SharedSource,
}

impl TestPatternRemote {
    pub async fn new(source: SharedSource) -> Result<Self> {
        if !source.lock().await.has_test_pattern() {
            return Err(StbtError::configuration(
                "The \"test\" control can only be used with a test-pattern source pipeline",
            ));
        }
        Ok(Self { source })
    }

    /// Accept exactly the strings "0" to "20"
    pub fn parse_key(key: &str) -> Result<u8> {
        key.parse::<u8>()
            .ok()
            .filter(|n| *n <= MAX_TEST_PATTERN && n.to_string() == key)
            .ok_or_else(|| StbtError::InvalidKey {
                key: key.to_string(),
                control: "test",
                allowed: "only \"0\" to \"20\" allowed",
            })
    }
}

#[async_trait]
impl RemoteControl for TestPatternRemote {
    async fn press(&mut self, key: &str) -> Result<()> {
        let pattern = Self::parse_key(key)?;
        self.source.lock().await.set_pattern(pattern)?;
        debug!("Pressed {}", key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "test"
    }
}

/// Sends key presses to a set-top box running a virtual remote listener
pub struct VirtualRemote {
    stream: Option<TcpStream>,
    endpoint: String,
}

impl VirtualRemote {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let host = if host.is_empty() { "localhost" } else { host };
        let endpoint = format!("VirtualRemote at {}:{}", host, port);
        debug!("VirtualRemote: Connecting to {}:{}", host, port);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::ConnectFailed { endpoint, source }.into()),
            Err(_) => return Err(TransportError::ConnectTimeout { endpoint, timeout }.into()),
        };
        // Presses are tiny and latency matters more than batching
        stream.set_nodelay(true)?;

        info!("VirtualRemote: Connected to {}:{}", host, port);
        Ok(Self {
            stream: Some(stream),
            endpoint,
        })
    }
}

#[async_trait]
impl RemoteControl for VirtualRemote {
    async fn press(&mut self, key: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::Closed {
            endpoint: self.endpoint.clone(),
        })?;
        stream
            .write_all(&encode_vr_press(key))
            .await
            .map_err(|source| TransportError::SendFailed {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        debug!("Pressed {}", key);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!("VirtualRemote: Closed {}", self.endpoint);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "vr"
    }
}

/// Sends key presses through a LIRC-driven infrared blaster
pub struct LircRemote {
    stream: Option<UnixStream>,
    remote: String,
    endpoint: String,
}

impl LircRemote {
    pub async fn connect(socket: &Path, remote: &str, timeout: Duration) -> Result<Self> {
        let endpoint = format!("Lirc socket {}", socket.display());
        debug!("LircRemote: Connecting to {}", socket.display());

        let stream = match tokio::time::timeout(timeout, UnixStream::connect(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::ConnectFailed { endpoint, source }.into()),
            Err(_) => return Err(TransportError::ConnectTimeout { endpoint, timeout }.into()),
        };

        info!("LircRemote: Connected to {}", socket.display());
        Ok(Self {
            stream: Some(stream),
            remote: remote.to_string(),
            endpoint,
        })
    }
}

#[async_trait]
impl RemoteControl for LircRemote {
    async fn press(&mut self, key: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| TransportError::Closed {
            endpoint: self.endpoint.clone(),
        })?;
        stream
            .write_all(encode_lirc_press(&self.remote, key).as_bytes())
            .await
            .map_err(|source| TransportError::SendFailed {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        debug!("Pressed {}", key);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!("LircRemote: Closed {}", self.endpoint);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "lirc"
    }
}
