//! Texture sample code generation for uspgen
//!
//! This crate turns texture sample descriptions into USSE code:
//! - channel layout of fetched texture data
//! - fetch emission (state words, coordinates, SMP, waits, colour conversion)
//! - unpacking into the destination format, or direct placement
//! - shader-wide chunk scheduling between iterators and the shader
//! - texture format and hardware swizzle decisions

pub mod block;
pub mod chan_info;
pub mod chunks;
pub mod context;
pub mod desc;
pub mod fetch;
pub mod format;
pub mod input_data;
pub mod sample;
pub mod shader;
pub mod tex_formats;
pub mod unpack;

pub use block::{BlockInst, InstBlock, InstBlockManager, InstStream};
pub use chan_info::{ChanSource, ConstVal, TexChanInfo, TexType, MAX_CHUNKS};
pub use chunks::{decide_chunks_sampling, ChunkSchedule, SchedulePhase};
pub use context::UspContext;
pub use desc::{CoordSource, Filter, RegRef, SampleDesc, ShaderDesc, ShaderInfo, TextureDesc};
pub use fetch::{emit_fetch, GenEnv};
pub use format::{TexFormat, TexFormatDesc};
pub use input_data::{InputData, InputEntry, InputKind};
pub use sample::{FormatDecision, Sample, SampleUnpack};
pub use shader::Shader;
pub use tex_formats::{decide_final_texture_formats, TexCtrlWords};
pub use unpack::emit_unpack;
