//! RTMP protocol constants

/// Protocol version carried in C0/S0
pub const RTMP_VERSION: u8 = 3;

/// C1/S1/C2/S2 size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size every connection starts with
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size the pusher requests after the handshake
pub const PUSHER_CHUNK_SIZE: u32 = 60_000;

/// Largest chunk size a peer may announce (top bit must be clear)
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Window acknowledgement size we announce
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 5_000_000;

/// Bounds applied to the peer's window acknowledgement size
pub const MIN_PEER_WINDOW_SIZE: u32 = 32 * 1024;
pub const MAX_PEER_WINDOW_SIZE: u32 = 1280 * 1024;

/// Timestamps at or above this value use the extended field
pub const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;

// Outbound chunk stream ids
pub const CHUNK_NETWORK: u32 = 2;
pub const CHUNK_SYSTEM: u32 = 3;
pub const CHUNK_CLIENT_REQUEST_AFTER: u32 = 4;
pub const CHUNK_AUDIO: u32 = 6;
pub const CHUNK_VIDEO: u32 = 7;

/// Message stream 0 carries NetConnection traffic
pub const STREAM_CONTROL: u32 = 0;
/// Message stream id a server hands out for the first createStream
pub const STREAM_MEDIA: u32 = 1;

// Message type ids
pub const MSG_SET_CHUNK: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACK: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WIN_SIZE: u8 = 5;
pub const MSG_SET_PEER_BW: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA3: u8 = 15;
pub const MSG_OBJECT3: u8 = 16;
pub const MSG_CMD3: u8 = 17;
pub const MSG_DATA: u8 = 18;
pub const MSG_OBJECT: u8 = 19;
pub const MSG_CMD: u8 = 20;
pub const MSG_AGGREGATE: u8 = 22;

// User control event types
pub const CONTROL_STREAM_BEGIN: u16 = 0;
pub const CONTROL_STREAM_EOF: u16 = 1;
pub const CONTROL_STREAM_DRY: u16 = 2;
pub const CONTROL_SETBUFFER: u16 = 3;
pub const CONTROL_STREAM_IS_RECORDED: u16 = 4;
pub const CONTROL_PING_REQUEST: u16 = 6;
pub const CONTROL_PING_RESPONSE: u16 = 7;

// Set peer bandwidth limit types
pub const BANDWIDTH_LIMIT_HARD: u8 = 0;
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names
pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_SEEK: &str = "seek";
pub const CMD_PLAYBACK_SPEED: &str = "playbackSpeed";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_ON_META_DATA: &str = "onMetaData";
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_BW_DONE: &str = "onBWDone";
pub const CMD_CLOSE: &str = "close";

/// Value written as the `server` metadata field
pub const SERVER_NAME: &str = concat!("rtmp-live/", env!("CARGO_PKG_VERSION"));

/// Default RTMP port
pub const DEFAULT_PORT: u16 = 1935;
