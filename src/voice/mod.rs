//! Voice processing module
//!
//! Microphone capture, the gapless playback compositor and barge-in handling.
//! Device access goes through [`CaptureDevice`] and [`AudioOutput`] so the
//! session can run against cpal or the in-memory backends.

mod capture;
pub mod compositor;
mod interrupt;
pub mod memory;
mod output;
mod player;
pub mod wav;

pub use capture::{CaptureDevice, CaptureStream, CpalCapture, CpalCaptureStream};
pub use compositor::{AudioSegment, ContinuousBuffer, GaplessEngine};
pub use interrupt::{FADE_FLOOR, Interruption, InterruptionController};
pub use memory::{GainRamp, MemoryCapture, MemoryMicrophone, MemoryOutput, MemoryOutputProbe};
pub use output::{AudioOutput, CompletionFn, CpalOutput};
pub use player::{Player, PlayerEvent, PlayerNotify, Transition};
pub use wav::{samples_to_wav, strip_wav_header};
