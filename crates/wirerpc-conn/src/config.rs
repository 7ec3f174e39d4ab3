use std::time::Duration;

use wirerpc_frame::{Compressors, FrameConfig};

/// Default write-queue capacity, in frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default per-call payload chunk queue capacity, in chunks.
pub const DEFAULT_CHUNK_QUEUE_CAPACITY: usize = 1024;
/// Default size of chunks produced when splitting a body.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Default time allowed for the preamble exchange.
pub const DEFAULT_PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection behavior, shared by client and server sides.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Frame size limits applied by the read loop.
    pub frame: FrameConfig,
    /// Capacity of the write queue. Producers block when it is full.
    pub queue_capacity: usize,
    /// Capacity of each call's payload chunk queue.
    pub chunk_queue_capacity: usize,
    /// Chunk size used by `PayloadWriter::write_all` and `copy_from`.
    pub chunk_size: usize,
    /// Deadline for writing and verifying the preamble.
    pub preamble_timeout: Duration,
    /// Payload compression codecs available on this connection.
    pub compressors: Compressors,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_queue_capacity: DEFAULT_CHUNK_QUEUE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            preamble_timeout: DEFAULT_PREAMBLE_TIMEOUT,
            compressors: Compressors::default(),
        }
    }
}

impl ConnConfig {
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_chunk_queue_capacity(mut self, capacity: usize) -> Self {
        self.chunk_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_preamble_timeout(mut self, timeout: Duration) -> Self {
        self.preamble_timeout = timeout;
        self
    }

    pub fn with_compressors(mut self, compressors: Compressors) -> Self {
        self.compressors = compressors;
        self
    }
}

/// Keepalive prober settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Delay between probes.
    pub interval: Duration,
    /// How long to wait for each Pong.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Server-side settings.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Settings applied to every accepted connection.
    pub conn: ConnConfig,
    /// Drop connections accepted while this many are active.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    pub fn with_conn_config(mut self, conn: ConnConfig) -> Self {
        self.conn = conn;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }
}
