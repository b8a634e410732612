//! Test-script facing API: one remote control plus one wait engine for the
//! device under test.

use crate::capture::SharedSource;
use crate::config::StbtConfig;
use crate::engine::{ImageEngine, NullEngine};
use crate::error::{Result, StbtError};
use crate::events::{DetectionBus, HealthReceiver};
use crate::recovery::RecoveryState;
use crate::remote::{uri_to_remote, RemoteControl};
use crate::wait::{MatchParameters, MotionParameters, WaitEngine, WaitResult};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

pub struct Session {
    control: Box<dyn RemoteControl>,
    wait: WaitEngine,
    config: StbtConfig,
    directory: Option<PathBuf>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &StbtConfig {
        &self.config
    }

    pub fn bus(&self) -> &DetectionBus {
        self.wait.bus()
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.wait.recovery_state()
    }

    /// Defaults for a match search, with `image` resolved
    pub fn match_parameters<P: AsRef<Path>>(&self, image: P) -> Result<MatchParameters> {
        MatchParameters::from_config(self.resolve(image.as_ref()), &self.config.wait)
    }

    /// Defaults for a motion search
    pub fn motion_parameters(&self) -> Result<MotionParameters> {
        MotionParameters::from_config(&self.config.wait)
    }

    pub async fn press(&mut self, key: &str) -> Result<()> {
        self.control.press(key).await
    }

    /// Wait for `image` with the configured defaults
    pub async fn wait_for_match<P: AsRef<Path>>(&mut self, image: P) -> Result<WaitResult> {
        let params = self.match_parameters(image)?;
        self.wait.wait_for_match(params).await
    }

    /// Wait for a match with explicit parameters; a relative image path is
    /// resolved like in [`Session::wait_for_match`]
    pub async fn wait_for_match_with(&mut self, mut params: MatchParameters) -> Result<WaitResult> {
        params.image = self.resolve(&params.image);
        self.wait.wait_for_match(params).await
    }

    pub async fn wait_for_motion(&mut self) -> Result<WaitResult> {
        let params = self.motion_parameters()?;
        self.wait.wait_for_motion(params).await
    }

    /// Wait for motion with explicit parameters. The mask must exist.
    pub async fn wait_for_motion_with(&mut self, mut params: MotionParameters) -> Result<WaitResult> {
        if let Some(mask) = params.mask.take() {
            let resolved = self.resolve(&mask);
            if !resolved.is_file() {
                return Err(StbtError::configuration(format!(
                    "mask '{}' does not exist",
                    mask.display()
                )));
            }
            params.mask = Some(resolved);
        }
        self.wait.wait_for_motion(params).await
    }

    /// Press `key` until `image` appears, checking for up to the configured
    /// interval after each press.
    ///
    /// Gives up with the last timeout once `max_presses` presses didn't
    /// help.
    pub async fn press_until_match<P: AsRef<Path>>(&mut self, key: &str, image: P) -> Result<WaitResult> {
        let params = self
            .match_parameters(image)?
            .timeout(self.config.press_until_match.interval()?);
        let max_presses = self.config.press_until_match.max_presses;

        let mut presses = 0;
        loop {
            let result = self.wait.wait_for_match(params.clone()).await?;
            if result.is_matched() || presses >= max_presses {
                if !result.is_matched() {
                    info!("Gave up pressing {} after {} presses", key, presses);
                }
                return Ok(result);
            }
            self.control.press(key).await?;
            presses += 1;
        }
    }

    /// Close the remote control transport
    pub async fn close(&mut self) -> Result<()> {
        self.control.close().await
    }

    /// Absolute paths are kept. Relative ones are looked up in the script
    /// directory first, then in the working directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        resolve_path(path, self.directory.as_deref())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("control", &self.control.name())
            .field("directory", &self.directory)
            .finish()
    }
}

pub fn resolve_path(path: &Path, directory: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    if let Some(directory) = directory {
        let candidate = directory.join(path);
        if candidate.is_file() {
            return candidate;
        }
    }

    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            debug!("No working directory to resolve {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: Option<StbtConfig>,
    control: Option<Box<dyn RemoteControl>>,
    engine: Option<Box<dyn ImageEngine>>,
    bus: Option<(DetectionBus, HealthReceiver)>,
    source: Option<SharedSource>,
    directory: Option<PathBuf>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            control: None,
            engine: None,
            bus: None,
            source: None,
            directory: None,
        }
    }

    pub fn config(mut self, config: StbtConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this control instead of the one named by `global.control`
    pub fn control(mut self, control: Box<dyn RemoteControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn engine(mut self, engine: Box<dyn ImageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach to an existing bus, e.g. one the image engine already feeds
    pub fn bus(mut self, bus: DetectionBus, health: HealthReceiver) -> Self {
        self.bus = Some((bus, health));
        self
    }

    pub fn source(mut self, source: SharedSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Directory relative reference images are looked up in first
    pub fn directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub async fn build(self) -> Result<Session> {
        let config = self
            .config
            .ok_or_else(|| StbtError::system("Session configuration must be specified"))?;
        config
            .validate()
            .map_err(|e| StbtError::configuration(e.to_string()))?;

        let control = match self.control {
            Some(control) => control,
            None => {
                uri_to_remote(&config.global.control, self.source.as_ref(), &config.remote).await?
            }
        };
        info!("Using {} remote control", control.name());

        let (bus, health) = self
            .bus
            .unwrap_or_else(|| DetectionBus::new(config.events.bus_capacity));
        let engine = self.engine.unwrap_or_else(|| Box::new(NullEngine));
        let wait = WaitEngine::new(&config, engine, bus, health, self.source)?;

        Ok(Session {
            control,
            wait,
            config,
            directory: self.directory,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Session`] for callers without an async runtime.
///
/// Every call runs the session on a private single-threaded runtime until
/// that call completes, so a wait's timers and events are only serviced
/// while the wait is in progress.
pub struct BlockingSession {
    runtime: Runtime,
    session: Session,
}

impl BlockingSession {
    pub fn new(builder: SessionBuilder) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let session = runtime.block_on(builder.build())?;
        Ok(Self { runtime, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn press(&mut self, key: &str) -> Result<()> {
        self.runtime.block_on(self.session.press(key))
    }

    pub fn wait_for_match<P: AsRef<Path>>(&mut self, image: P) -> Result<WaitResult> {
        self.runtime.block_on(self.session.wait_for_match(image))
    }

    pub fn wait_for_match_with(&mut self, params: MatchParameters) -> Result<WaitResult> {
        self.runtime.block_on(self.session.wait_for_match_with(params))
    }

    pub fn wait_for_motion(&mut self) -> Result<WaitResult> {
        self.runtime.block_on(self.session.wait_for_motion())
    }

    pub fn wait_for_motion_with(&mut self, params: MotionParameters) -> Result<WaitResult> {
        self.runtime.block_on(self.session.wait_for_motion_with(params))
    }

    pub fn press_until_match<P: AsRef<Path>>(&mut self, key: &str, image: P) -> Result<WaitResult> {
        self.runtime.block_on(self.session.press_until_match(key, image))
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.session.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DetectionEvent, MatchEvent};
    use crate::mock::{MockImageEngine, MockRemote};
    use std::time::Duration;
    use tokio::time::sleep;

    fn found() -> DetectionEvent {
        DetectionEvent::Match(MatchEvent {
            matched: true,
            x: 10,
            y: 20,
            width: 40,
            height: 30,
            confidence: 0.99,
            timestamp: 0,
        })
    }

    async fn session_with(remote: MockRemote, mut config: StbtConfig) -> Session {
        config.press_until_match.interval_secs = 1.0;
        config.press_until_match.max_presses = 3;
        Session::builder()
            .config(config)
            .control(Box::new(remote))
            .engine(Box::new(MockImageEngine::new()))
            .build()
            .await
            .unwrap()
    }

    #[test]
    fn test_resolve_absolute_path_unchanged() {
        let path = Path::new("/refs/logo.png");
        assert_eq!(resolve_path(path, Some(Path::new("/scripts"))), path);
    }

    #[test]
    fn test_resolve_prefers_script_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), b"png").unwrap();

        let resolved = resolve_path(Path::new("logo.png"), Some(dir.path()));
        assert_eq!(resolved, dir.path().join("logo.png"));
    }

    #[test]
    fn test_resolve_falls_back_to_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();

        let resolved = resolve_path(Path::new("missing.png"), Some(dir.path()));
        assert_eq!(resolved, cwd.join("missing.png"));
    }

    #[tokio::test]
    async fn test_builder_requires_config() {
        let result = SessionBuilder::new().build().await;
        assert!(matches!(result, Err(StbtError::System { .. })));
    }

    #[tokio::test]
    async fn test_builder_uses_configured_control() {
        let mut config = StbtConfig::default();
        config.global.control = "nonsense:".to_string();
        let result = Session::builder().config(config).build().await;
        assert!(matches!(result, Err(StbtError::Configuration { .. })));

        let session = Session::builder()
            .config(StbtConfig::default())
            .build()
            .await
            .unwrap();
        assert!(format!("{:?}", session).contains("none"));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_durations() {
        let mut config = StbtConfig::default();
        config.wait.timeout_secs = -1.0;
        let result = Session::builder().config(config).build().await;
        assert!(matches!(result, Err(StbtError::Configuration { .. })));

        let mut config = StbtConfig::default();
        config.recovery.settle_secs = f64::NAN;
        let result = Session::builder().config(config).build().await;
        assert!(matches!(result, Err(StbtError::Configuration { .. })));
    }

    #[test]
    fn test_blocking_session_with_negative_timeout_fails_cleanly() {
        let mut config = StbtConfig::default();
        config.wait.timeout_secs = -1.0;

        let result = BlockingSession::new(Session::builder().config(config));
        assert!(matches!(result, Err(StbtError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_missing_mask_is_configuration_error() {
        let mut session = session_with(MockRemote::new(), StbtConfig::default()).await;
        let params = session.motion_parameters().unwrap().mask("/nonexistent/mask.png");

        let result = session.wait_for_motion_with(params).await;
        assert!(matches!(result, Err(StbtError::Configuration { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_until_match_gives_up_after_max_presses() {
        let remote = MockRemote::new();
        let mut session = session_with(remote.clone(), StbtConfig::default()).await;

        let result = session.press_until_match("DOWN", "/refs/item.png").await.unwrap();

        assert!(matches!(result, WaitResult::TimedOut(_)));
        assert_eq!(remote.pressed(), ["DOWN", "DOWN", "DOWN"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_until_match_stops_when_found() {
        let remote = MockRemote::new();
        let mut session = session_with(remote.clone(), StbtConfig::default()).await;
        let bus = session.bus().clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            bus.publish(found());
        });

        let result = session.press_until_match("DOWN", "/refs/item.png").await.unwrap();

        assert_eq!(result.position(), Some(crate::frame::Position::new(10, 20)));
        assert_eq!(remote.pressed(), ["DOWN", "DOWN"]);
    }

    #[test]
    fn test_blocking_session_drives_its_own_runtime() {
        let mut config = StbtConfig::default();
        config.wait.timeout_secs = 0.05;
        let builder = Session::builder().config(config);
        let mut session = BlockingSession::new(builder).unwrap();

        session.press("MENU").unwrap();
        let result = session.wait_for_match("/refs/menu.png").unwrap();
        assert!(!result.is_matched());
        session.close().unwrap();
    }
}
