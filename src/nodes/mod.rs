//! Built-in audio nodes.
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`Sine`], [`Phasor`], [`Triangle`] - oscillators with frequency/amplitude control
//! - [`BufferPlayer`] - play decoded audio held in memory
//! - [`FilePlayer`] - stream a [`SourceFile`](crate::SourceFile) through a reader thread
//! - [`CallbackSource`] - generate blocks from a closure
//!
//! ## Effects ([`effect`])
//!
//! Process the audio of their inputs:
//! - [`Gain`] - volume with smoothing
//! - [`Pan2d`] - equal-power stereo panner
//! - [`LowPass`], [`HighPass`], [`BandPass`] - biquad filters
//! - [`Mixer`] - numbered busses with per-bus volume and pan
//! - [`Tap`] - copy passing audio to another thread
//! - [`ChannelConverter`] - up- and down-mixing, spliced in by the context
//!
//! ## Native ([`native`])
//!
//! Nodes backed by a [`NativeVoice`](crate::NativeVoice):
//! - [`NativeEffect`] - an effect voice of the engine
//! - [`VoiceAdapter`] - feeds generic audio into a native chain, spliced in by the context
//!
//! ## Targets ([`target`])
//!
//! - [`LineOut`] - output to a [`Device`](crate::Device)
//!
//! # Message Types
//!
//! Nodes with runtime parameters take messages through their [`Handle`](crate::Handle):
//! - [`OscillatorMessage`] - oscillator frequency and amplitude
//! - [`PlayerMessage`] - [`BufferPlayer`] seeking and looping
//! - [`GainMessage`], [`PanMessage`], [`FilterMessage`]
//! - [`MixerMessage`], built by the validated `send_bus_*` methods of `Handle<Mixer>`
//!
//! Nodes without parameters use `()` as their message type.

pub mod effect;
pub mod native;
pub mod source;
pub mod target;

pub use effect::{
    BandPass, ChannelConverter, FilterMessage, Gain, GainMessage, HighPass, LowPass, Mixer, MixerMessage, Pan2d,
    PanMessage, Tap, TapReader, DEFAULT_MAX_BUSSES, DEFAULT_Q,
};
pub use native::{NativeEffect, VoiceAdapter};
pub use source::{
    BufferPlayer, CallbackSource, FilePlayer, OscillatorMessage, Phasor, PlayerMessage, Sine, SineMessage, Triangle,
    RING_BUFFER_PADDING,
};
pub use target::{LineOut, Target};
