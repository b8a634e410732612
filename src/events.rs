use crate::frame::{Frame, Position};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// Result of running the template matcher over one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub matched: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// First-pass match certainty, 0.0 to 1.0
    pub confidence: f64,
    /// Stream timestamp of the frame in nanoseconds
    pub timestamp: i64,
}

impl MatchEvent {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Result of running the motion detector over one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    pub has_motion: bool,
    pub timestamp: i64,
}

/// Buffering state reported by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHealthEvent {
    /// No new data is arriving from the video source
    Underrun,
    /// Data is flowing again
    Running,
}

/// A health event together with the moment it was observed
#[derive(Debug, Clone, Copy)]
pub struct HealthNotice {
    pub event: TransportHealthEvent,
    pub at: Instant,
}

/// Everything the image-processing engine can tell us
#[derive(Debug, Clone)]
pub enum DetectionEvent {
    Match(MatchEvent),
    Motion(MotionEvent),
    Health(TransportHealthEvent),
    /// The template matcher could not load the reference image
    ReferenceLoadFailed {
        path: Option<PathBuf>,
        message: String,
    },
    /// Non-fatal warning from a pipeline element
    Warning { source: String, message: String },
    /// Fatal pipeline error
    Error { source: String, message: String },
}

impl DetectionEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            DetectionEvent::Match(m) => format!(
                "{} at {},{} with dimensions {}x{}, 1st pass {:.0}%, timestamp {}",
                if m.matched { "Match" } else { "Weak match" },
                m.x,
                m.y,
                m.width,
                m.height,
                100.0 * m.confidence,
                m.timestamp
            ),
            DetectionEvent::Motion(m) => format!(
                "{} at timestamp {}",
                if m.has_motion { "Motion" } else { "No motion" },
                m.timestamp
            ),
            DetectionEvent::Health(TransportHealthEvent::Underrun) => {
                "Source buffer underrun".to_string()
            }
            DetectionEvent::Health(TransportHealthEvent::Running) => {
                "Source buffer running".to_string()
            }
            DetectionEvent::ReferenceLoadFailed { path, message } => match path {
                Some(path) => format!("Failed to load '{}': {}", path.display(), message),
                None => format!("Failed to load reference: {}", message),
            },
            DetectionEvent::Warning { source, message } => {
                format!("Warning from {}: {}", source, message)
            }
            DetectionEvent::Error { source, message } => {
                format!("Error from {}: {}", source, message)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            DetectionEvent::Match(_) => "match",
            DetectionEvent::Motion(_) => "motion",
            DetectionEvent::Health(_) => "health",
            DetectionEvent::ReferenceLoadFailed { .. } => "reference_load_failed",
            DetectionEvent::Warning { .. } => "warning",
            DetectionEvent::Error { .. } => "error",
        }
    }
}

/// Health notices held for the recovery controller between waits
pub const HEALTH_QUEUE_CAPACITY: usize = 64;

/// Event bus connecting the external engine to the wait and recovery logic.
///
/// Detection events fan out over a broadcast channel to whoever is waiting
/// right now; with nobody subscribed they are dropped. Health events go to
/// a single queue owned by the recovery controller so that an underrun is
/// never lost between two waits. The most recent frame is kept aside for
/// diagnostics.
pub struct DetectionBus {
    sender: broadcast::Sender<DetectionEvent>,
    health: Arc<HealthQueue>,
    latest_frame: Arc<Mutex<Option<Frame>>>,
}

/// Receiving end of the health queue, handed to the recovery controller
pub type HealthReceiver = mpsc::Receiver<HealthNotice>;

/// Sending side of the health queue.
///
/// A repeat of the last queued state changes nothing for the recovery
/// controller, so only transitions are queued. The first notice of a run
/// keeps its timestamp.
struct HealthQueue {
    sender: mpsc::Sender<HealthNotice>,
    last_queued: Mutex<Option<TransportHealthEvent>>,
}

impl HealthQueue {
    fn push(&self, event: TransportHealthEvent) {
        let mut last_queued = self.last_queued.lock();
        if *last_queued == Some(event) {
            trace!("Health is already {:?}, not queueing it again", event);
            return;
        }

        let notice = HealthNotice {
            event,
            at: Instant::now(),
        };
        match self.sender.try_send(notice) {
            Ok(()) => *last_queued = Some(event),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Health queue is full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("No recovery controller listening, dropping {:?}", event);
            }
        }
    }
}

impl DetectionBus {
    /// Create a new bus with the specified broadcast capacity
    pub fn new(capacity: usize) -> (Self, HealthReceiver) {
        let (sender, _) = broadcast::channel(capacity);
        let (health, health_rx) = mpsc::channel(HEALTH_QUEUE_CAPACITY);
        (
            Self {
                sender,
                health: Arc::new(HealthQueue {
                    sender: health,
                    last_queued: Mutex::new(None),
                }),
                latest_frame: Arc::new(Mutex::new(None)),
            },
            health_rx,
        )
    }

    /// Subscribe to detection events.
    ///
    /// Dropping the returned receiver is what detaches it; there is no
    /// separate disconnect call to forget.
    pub fn subscribe(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event from the engine, returning how many waits saw it
    pub fn publish(&self, event: DetectionEvent) -> usize {
        trace!("Publishing event: {}", event.description());

        match &event {
            DetectionEvent::Health(health) => {
                self.health.push(*health);
                return 0;
            }
            DetectionEvent::Warning { source, message } => {
                warn!("Warning from {}: {}", source, message);
            }
            DetectionEvent::Error { source, message } => {
                error!("Error from {}: {}", source, message);
            }
            _ => {}
        }

        // An error here only means no wait is active
        self.sender.send(event).unwrap_or(0)
    }

    /// Record the frame the engine just processed
    pub fn publish_frame(&self, frame: Frame) {
        *self.latest_frame.lock() = Some(frame);
    }

    /// Most recent frame, if the pipeline has produced one yet
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest_frame.lock().clone()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for DetectionBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            health: Arc::clone(&self.health),
            latest_frame: Arc::clone(&self.latest_frame),
        }
    }
}

impl std::fmt::Debug for DetectionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Events a match search cares about
    pub fn match_search() -> Self {
        EventFilter::EventTypes(vec!["match", "reference_load_failed", "error"])
    }

    /// Events a motion search cares about
    pub fn motion_search() -> Self {
        EventFilter::EventTypes(vec!["motion", "reference_load_failed", "error"])
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &DetectionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// What a subscriber gets back from [`EventReceiver::recv`]
#[derive(Debug, Clone)]
pub enum Received {
    Event(DetectionEvent),
    /// The receiver fell behind and this many events were dropped
    Lagged(u64),
    Closed,
}

/// Filtered subscription to the detection bus
pub struct EventReceiver {
    receiver: broadcast::Receiver<DetectionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<DetectionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Received {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        trace!("Receiver '{}' received: {}", self.name, event.description());
                        return Received::Event(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Received::Lagged(n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Received::Closed;
                }
            }
        }
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use tokio::time::{timeout, Duration};

    fn match_event(matched: bool, x: i32, y: i32) -> DetectionEvent {
        DetectionEvent::Match(MatchEvent {
            matched,
            x,
            y,
            width: 10,
            height: 10,
            confidence: 0.9,
            timestamp: 0,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let (bus, _health) = DetectionBus::new(8);
        assert_eq!(bus.publish(match_event(true, 1, 1)), 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let (bus, _health) = DetectionBus::new(8);
        let mut receiver = bus.subscribe(EventFilter::match_search(), "test");

        bus.publish(DetectionEvent::Motion(MotionEvent {
            has_motion: true,
            timestamp: 1,
        }));
        bus.publish(match_event(true, 5, 6));

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap();
        match received {
            Received::Event(DetectionEvent::Match(m)) => assert_eq!(m.position(), Position::new(5, 6)),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropping_receiver_detaches() {
        let (bus, _health) = DetectionBus::new(8);
        {
            let _receiver = bus.subscribe(EventFilter::All, "scoped");
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_health_events_are_queued_for_recovery() {
        let (bus, mut health) = DetectionBus::new(8);
        let mut receiver = bus.subscribe(EventFilter::All, "test");

        assert_eq!(bus.publish(DetectionEvent::Health(TransportHealthEvent::Underrun)), 0);

        let notice = health.try_recv().unwrap();
        assert_eq!(notice.event, TransportHealthEvent::Underrun);
        assert!(timeout(Duration::from_millis(10), receiver.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_health_is_queued_once() {
        let (bus, mut health) = DetectionBus::new(8);

        for _ in 0..10 {
            bus.publish(DetectionEvent::Health(TransportHealthEvent::Underrun));
        }
        bus.clone()
            .publish(DetectionEvent::Health(TransportHealthEvent::Underrun));

        assert_eq!(health.try_recv().unwrap().event, TransportHealthEvent::Underrun);
        assert!(health.try_recv().is_err());

        // Once consumed, the same state is still not a transition
        bus.publish(DetectionEvent::Health(TransportHealthEvent::Underrun));
        assert!(health.try_recv().is_err());

        bus.publish(DetectionEvent::Health(TransportHealthEvent::Running));
        bus.publish(DetectionEvent::Health(TransportHealthEvent::Underrun));
        assert_eq!(health.try_recv().unwrap().event, TransportHealthEvent::Running);
        assert_eq!(health.try_recv().unwrap().event, TransportHealthEvent::Underrun);
    }

    #[tokio::test]
    async fn test_flapping_health_queue_is_bounded() {
        let (bus, mut health) = DetectionBus::new(8);

        for i in 0..(3 * HEALTH_QUEUE_CAPACITY) {
            let event = if i % 2 == 0 {
                TransportHealthEvent::Underrun
            } else {
                TransportHealthEvent::Running
            };
            bus.publish(DetectionEvent::Health(event));
        }

        let mut queued = 0;
        while health.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, HEALTH_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_lagging_receiver_reports_drop_count() {
        let (bus, _health) = DetectionBus::new(2);
        let mut receiver = bus.subscribe(EventFilter::All, "slow");

        for i in 0..5 {
            bus.publish(match_event(true, i, i));
        }

        match receiver.recv().await {
            Received::Lagged(n) => assert_eq!(n, 3),
            other => panic!("Expected lag, got {:?}", other),
        }
    }

    #[test]
    fn test_latest_frame_snapshot() {
        let (bus, _health) = DetectionBus::new(2);
        assert!(bus.latest_frame().is_none());

        bus.publish_frame(Frame::new(7, vec![1, 2, 3], 1, 1, FrameFormat::Bgr24));
        assert_eq!(bus.latest_frame().unwrap().timestamp, 7);
    }

    #[test]
    fn test_event_properties() {
        let event = match_event(false, 3, 4);
        assert_eq!(event.event_type(), "match");
        assert!(event.description().starts_with("Weak match at 3,4"));
    }
}
