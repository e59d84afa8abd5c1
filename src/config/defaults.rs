//! System-wide default constants.
//!
//! Centralises magic numbers used as `Default` values for `PipelineConfig`.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// CRM — Connection Resilience Manager
// ============================================================================

/// How often each active endpoint is health-probed (ms).
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;
/// Staleness window for a connection with no successful probe (ms).
pub const CONNECTION_TIMEOUT_MS: u64 = 30_000;
/// Deadline for a failover attempt to land on an alternative endpoint (ms).
pub const FAILOVER_TIMEOUT_MS: u64 = 10_000;
/// Maximum number of backoff attempts before giving up on a connect.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Base delay for exponential backoff (ms).
pub const RETRY_DELAY_MS: u64 = 200;
/// Multiplier applied to the delay after every failed attempt.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;
/// Backoff delay ceiling (ms).
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
/// Consecutive failures required to open a circuit breaker.
pub const FAILURE_THRESHOLD: u32 = 3;
/// How long a breaker stays open before allowing a half-open probe (ms).
pub const CIRCUIT_BREAKER_TIMEOUT_MS: u64 = 15_000;
/// Window within which two frames with the same id/type+timestamp are duplicates (ms).
pub const DUPLICATE_DETECTION_WINDOW_MS: u64 = 2_000;

// ============================================================================
// DAS — Data Aggregation Service
// ============================================================================

/// How often the buffered aggregation points are resolved (ms).
pub const AGGREGATION_WINDOW_MS: u64 = 1_000;
/// Maximum age of an unresolved point before it is resolved regardless of source count (ms).
pub const MAX_DATA_AGE_MS: u64 = 5_000;
/// Threshold above which a numeric resolution is flagged as conflicting (coefficient of variation).
pub const CONFLICT_THRESHOLD: f64 = 0.10;
/// Minimum distinct sources required to resolve early.
pub const MIN_SOURCES: usize = 2;
/// Relative accuracy drop from the last recorded baseline that triggers a drift warning.
pub const DRIFT_THRESHOLD: f64 = 0.10;

// ============================================================================
// PT — Position Tracker
// ============================================================================

/// Position-tracker processing tick (ms).
pub const UPDATE_INTERVAL_MS: u64 = 1_000;
/// Age after which a rider with no update is pruned (ms).
pub const POSITION_TIMEOUT_MS: u64 = 60_000;
/// Haversine distance under which two GPS-equipped riders may share a group (m).
pub const GROUP_DISTANCE_THRESHOLD_M: f64 = 50.0;
/// Time-from-start delta under which two riders may share a group (s).
pub const GROUP_TIME_THRESHOLD_S: f64 = 5.0;
/// Maximum age of a stale position eligible for forward interpolation (s).
pub const MAX_INTERPOLATION_TIME_S: f64 = 30.0;
/// Minimum age of a stale position eligible for forward interpolation (s).
pub const MIN_INTERPOLATION_TIME_S: f64 = 5.0;

// ============================================================================
// TED — Tactical Event Detector
// ============================================================================

/// Detection cycle period (ms).
pub const DETECTION_INTERVAL_MS: u64 = 2_000;
/// Minimum match confidence required to publish an event.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;
/// How long a tactical event is retained before eviction (s).
pub const EVENT_RETENTION_S: u64 = 3_600;

// ============================================================================
// EB — Event Bus
// ============================================================================

/// Maximum events accumulated before a forced batch flush.
pub const BATCH_SIZE: usize = 100;
/// Maximum time an incomplete batch waits before a forced flush (ms).
pub const BATCH_TIMEOUT_MS: u64 = 500;
/// Upper bound on concurrently running handler invocations within one batch.
pub const MAX_CONCURRENT_UPDATES: usize = 8;
/// Default partition count for a newly created topic.
pub const DEFAULT_PARTITION_COUNT: usize = 4;
/// Bounded producer queue depth before publish is rejected.
pub const PRODUCER_QUEUE_CAPACITY: usize = 1_000;

// ============================================================================
// WSM — WebSocket Fanout
// ============================================================================

/// Server ping cadence (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
/// Sliding window for per-session rate limiting (ms).
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum messages per session per window.
pub const RATE_LIMIT_MAX: u32 = 100;
/// Maximum concurrently open sessions.
pub const MAX_CONNECTIONS: usize = 10_000;
/// Grace period for a clean shutdown broadcast before forced close (ms).
pub const SHUTDOWN_GRACE_MS: u64 = 5_000;
/// Suggested client reconnect delay sent with the shutdown notice (ms).
pub const SHUTDOWN_RECONNECT_DELAY_MS: u64 = 3_000;
/// A session whose last pong is older than this is closed with a timeout code (ms).
pub const WSM_CONNECTION_TIMEOUT_MS: u64 = 45_000;

// ============================================================================
// DNS — Notification Dispatcher
// ============================================================================

/// How often expired notifications and idle subscriptions are swept (ms).
pub const NOTIFICATION_CLEANUP_INTERVAL_MS: u64 = 30_000;
/// Idle time after which a subscription is removed (ms).
pub const MAX_IDLE_TIME_MS: u64 = 600_000;
/// Default per-subscriber notification cap (messages/minute).
pub const DEFAULT_MAX_NOTIFICATIONS_PER_MINUTE: u32 = 30;
