use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Open failure: {0}")]
    Open(#[from] OpenError),

    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),

    /// Disk or container I/O failed, e.g. the output volume is full.
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(#[from] io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Ring buffer error: {0}")]
    RingBuffer(#[from] RingBufferError),

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn { name: String, source: io::Error },

    #[error("Stage thread '{0}' panicked")]
    StagePanicked(String),
}

/// Outcomes of ring buffer locking policy.
///
/// `WouldBlock` and `EndOfStream` are ordinary control flow inside a stage and
/// never escape it; the remaining variants flag misuse of the cursor protocol.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("slot is occupied")]
    WouldBlock,

    #[error("end of stream")]
    EndOfStream,

    #[error("cursor has not advanced yet, there is no previous slot")]
    NoPreviousSlot,

    #[error("the producer cursor was already taken")]
    ProducerTaken,

    #[error("all {0} consumer roles are already registered")]
    TooManyConsumers(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no video or audio source configured")]
    NoSource,

    #[error("segment duration must be greater than zero")]
    ZeroSegmentDuration,

    #[error("fragment duration {fragment_ms}ms exceeds segment duration {segment_ms}ms")]
    FragmentLongerThanSegment { fragment_ms: u32, segment_ms: u32 },

    #[error("duplicate representation id '{0}'")]
    DuplicateRepresentation(String),

    #[error("{0} representations are configured without a {0} source")]
    MissingSource(&'static str),

    #[error("representation '{id}': {reason}")]
    InvalidRepresentation { id: String, reason: String },

    #[error("invalid switch window '{0}'")]
    InvalidSwitchWindow(String),

    #[error("ring buffer length must be at least 1")]
    ZeroBufferLength,
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("cannot open input '{url}': {reason}")]
    Input { url: String, reason: String },

    #[error("cannot open output for representation '{id}': {reason}")]
    Output { id: String, reason: String },

    #[error("cannot create scaler to {width}x{height}: {reason}")]
    Scaler {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("cannot create output directory: {0}")]
    OutputDirectory(io::Error),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("decoding failed on '{url}': {reason}")]
    Decode { url: String, reason: String },

    #[error("scaling failed: {0}")]
    Scale(String),

    #[error("encoding failed for representation '{id}': {reason}")]
    Encode { id: String, reason: String },

    #[error("muxing failed for representation '{id}': {reason}")]
    Mux { id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot write manifest '{path}': {source}")]
    Write { path: String, source: io::Error },
}
