//! Real-time engine for Lumen
//!
//! Audio comes in through [`input`], is reduced to feature vectors and
//! handed to the render loop through a latest-wins slot. The render loop
//! turns the active scene into DMX frames. Workers run under a
//! [`Supervisor`] with a [`Watchdog`] on the render loop; the
//! [`Controller`] ties it all together.

mod controller;
mod error;
mod event;
mod input;
mod prediction;
mod queue;
mod render;
mod supervisor;
mod sync;
mod watchdog;

pub use controller::{ConnectFn, Controller, DmxLink, EngineConfig, SceneSlot};
pub use error::EngineError;
pub use event::{event_channel, EngineEvent, EventSender, FrameHealth, HealthCounters};
pub use input::{
    list_input_devices, probe_device, run_capture, run_file, run_input, sample_ring, BlockPipeline, FileAudio,
    InputSource, SampleConsumer, SampleProducer,
};
pub use prediction::{
    run_prediction, LoudnessPredictor, Prediction, PredictionConfig, PredictionShared, PredictionWorker,
    SceneCache, ScenePredictor,
};
pub use queue::{latest_slot, SlotReceiver, SlotSender};
pub use render::{Renderer, TickReport};
pub use supervisor::{Restart, Supervisor, WorkerFn};
pub use sync::{FilePlayback, PlaybackFollower, PlaybackSource, PlaybackState, Section, SongLibrary, SongSections};
pub use watchdog::{run_watchdog, ReinitState, Watchdog};
