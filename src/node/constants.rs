/// Close code sent with [`DESTROY_CLOSE_REASON`] to end a connection for good.
pub const DESTROY_CLOSE_CODE: u16 = 1000;

/// Close reason that, paired with [`DESTROY_CLOSE_CODE`], suppresses reconnection.
pub const DESTROY_CLOSE_REASON: &str = "destroy";

/// Local marker for a socket that dropped without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

pub const DEFAULT_NODE_PORT: u16 = 80;

pub const DEFAULT_NODE_PASSWORD: &str = "youshallnotpass";

/// Delay (ms) before reconnecting after an unexpected close.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// Upper bound (ms) for the exponential reconnect strategy.
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Timeout (ms) allowed for a closing socket to flush its close frame.
pub const CLOSE_FLUSH_TIMEOUT_MS: u64 = 500;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_ID: &str = "user-id";
pub const HEADER_NUM_SHARDS: &str = "num-shards";
pub const HEADER_CLIENT_NAME: &str = "client-name";

pub const CLIENT_NAME: &str = concat!("rustalink-client/", env!("CARGO_PKG_VERSION"));

/// Reported when the peer closed without a status code.
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;
