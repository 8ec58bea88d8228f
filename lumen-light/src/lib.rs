//! Lighting model for Lumen
//!
//! - Fixture: fixture types, channel footprints, profiles
//! - Color: palette and color-macro codes
//! - Modulation: frequency, boolean and time modulators
//! - Effects: stateful per-fixture effects and their registry
//! - Orchestrator: cross-fixture choreography (hopper, racer)
//! - Scene: scene documents

mod color;
mod effects;
mod error;
mod fixture;
mod modulation;
mod orchestrator;
mod scene;

pub use color::{macro_code, named as named_color, ColorChoice, Rgb, PALETTE};
pub use effects::{
    build_effect, default_groups, fade_level, ChannelGroup, CustomState, Effect, EffectConfig, EffectContext, EffectRegistry,
    EffectState, FadeAfterTrigger, SequentialTrigger, SplatterEffect,
};
pub use error::LightError;
pub use fixture::{Fixture, FixtureType, Profile, MAX_CHANNEL};
pub use modulation::{
    brightness_channel, large_array, layout, power_to_level, process_light, BooleanParams, FrequencyParams, Look,
    Modulator, StrobeTarget, TimeParams, ValueSpec, Waveform,
};
pub use orchestrator::{
    build_orchestrator, orchestrator_types, Hopper, HopperConfig, LightModifier, Modifiers, Orchestrator,
    OrchestratorConfig, Racer, RacerConfig, RacerOrder,
};
pub use scene::{FixtureConfig, Scene};
