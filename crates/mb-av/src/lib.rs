//! # mb-av
//!
//! Media inspection and transcoding for the mediabox streaming engine.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for short-lived tool runs.
//! - **Probing** ([`probe`]) -- the [`Prober`] seam, the ffprobe backend and
//!   the single-flight [`ProbeCache`].
//! - **Codec resolution** ([`codec`]) -- source codec to hardware decoder.
//! - **Seek planning** ([`seek`]) -- coarse/fine seek split for segments.
//! - **Pipeline building** ([`pipeline`]) -- the exact ffmpeg argument vector.
//! - **Process supervision** ([`supervisor`]) -- one live transcoder, with
//!   preemption and client-disconnect cancellation.

pub mod codec;
pub mod command;
pub mod pipeline;
pub mod probe;
pub mod seek;
pub mod supervisor;
pub mod tools;

// ---- Re-exports for convenience ----

pub use codec::{decoder_for, resolve_decoder, HwAccel};
pub use command::{ToolCommand, ToolOutput};
pub use pipeline::{build_args, EncodeSettings, PipelineInput};
pub use probe::{CacheLookup, FfprobeProber, ProbeCache, ProbeResult, Prober};
pub use seek::{SeekPlan, SegmentRequest};
pub use supervisor::{
    KillReason, ProcessExit, SupervisorConfig, TranscodeBody, TranscodeSession,
    TranscodeSupervisor,
};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
