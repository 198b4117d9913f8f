//! Error types for the texture-sample code generator

use thiserror::Error;

/// Main error type for code generation
#[derive(Error, Debug)]
pub enum UspError {
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Emit error: {0}")]
    Emit(#[from] EmitError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid sample {0}: {1}")]
    InvalidSample(usize, String),

    #[error("Internal consistency violation: {0}")]
    Internal(String),
}

impl From<std::collections::TryReserveError> for UspError {
    fn from(_: std::collections::TryReserveError) -> Self {
        UspError::OutOfMemory
    }
}

/// Budget and capacity failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Not enough command list entries: need {needed}, have {available}")]
    IteratorSlots { needed: u32, available: u32 },

    #[error("Not enough primary attribute registers: need {needed}, have {available}")]
    PaRegisters { needed: u32, available: u32 },

    #[error("Instruction block {block} is full (capacity {capacity})")]
    BlockFull { block: u32, capacity: usize },

    #[error("Unknown instruction block {0}")]
    UnknownBlock(u32),

    #[error("Too many instruction blocks ({0})")]
    TooManyBlocks(usize),

    #[error("No input data registered for {0}")]
    MissingInputData(String),

    #[error("Out of temporary registers: need {needed}, have {available}")]
    Temps { needed: u32, available: u32 },
}

/// Texture format and channel layout violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Channel {chan} spans a chunk boundary")]
    ChannelSpansChunk { chan: usize },

    #[error("Channel {chan} spans a register boundary")]
    ChannelSpansRegister { chan: usize },

    #[error("Chunk sizes ({chunk_bits} bits) do not partition the texel ({chan_bits} bits)")]
    ChunkPartition { chan_bits: u32, chunk_bits: u32 },

    #[error("Unsupported content for channel {chan}")]
    InvalidContent { chan: usize },

    #[error("Alpha channel of a YUV texture cannot be read")]
    YuvAlphaRead,

    #[error("Malformed YUV channel layout")]
    InvalidYuvLayout,

    #[error("Too many chunks: {0}")]
    TooManyChunks(usize),

    #[error("Texture {0} is not described")]
    UnknownTexture(usize),
}

/// Instruction emission failures in the fetch and unpack phases
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("Internal register i{0} is live across a wait")]
    InternalRegLive(u32),

    #[error("No data location for chunk {0}")]
    MissingChunkData(usize),

    #[error("Unsupported pack from {src} to {dst}")]
    UnsupportedPack { src: &'static str, dst: &'static str },

    #[error("Non dependent samples not supported yet for {0} destinations")]
    NonDependentInteger(&'static str),

    #[error("Projected sampling with unnormalised coordinates")]
    ProjectedUnnormalised,

    #[error("Sample has no coordinate source")]
    NoCoordinates,

    #[error("Destination format {0} is not supported by this core")]
    UnsupportedDestFormat(&'static str),
}

/// Instruction encoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{opcode}: field {field} out of range (0x{value:x})")]
    FieldOverflow {
        opcode: &'static str,
        field: &'static str,
        value: u32,
    },

    #[error("{opcode}: invalid {operand} operand")]
    InvalidOperand {
        opcode: &'static str,
        operand: &'static str,
    },

    #[error("{opcode}: not available on this core")]
    Unavailable { opcode: &'static str },
}

/// Result type alias for code generation
pub type Result<T> = std::result::Result<T, UspError>;
