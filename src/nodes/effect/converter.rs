//! Channel count conversion

use crate::buffer::Buffer;
use crate::node::{AudioNode, ProcessContext};

/// Up- or down-mixes its input to its own channel count.
///
/// The context splices these in wherever a node receives an input with a
/// different channel count and cannot map channels itself. Mono spreads to
/// every channel, a mono output averages, anything else pairs channels by
/// index.
#[derive(Debug, Default)]
pub struct ChannelConverter;

impl ChannelConverter {
    pub fn new() -> Self {
        Self
    }
}

impl AudioNode for ChannelConverter {
    type Message = ();

    // mapping happens while the input is summed in
    fn process(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, _buffer: &mut Buffer) {}

    fn maps_input_channels(&self) -> bool {
        true
    }

    fn can_process_in_place(&self) -> bool {
        false
    }
}
