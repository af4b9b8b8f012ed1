//! Channel and sample-rate negotiation settings.

use crate::buffer::Layout;

/// How a node decides its channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Fixed by the user or the node.
    Specified,
    /// The largest channel count among the node's inputs.
    #[default]
    MatchesInput,
    /// Whatever the downstream chain specifies.
    MatchesOutput,
}

/// Format a node is created with.
///
/// Unset fields are negotiated when the graph initializes. A format is
/// complete once both the sample rate and the channel count are known.
///
/// ```
/// use schall::{ChannelMode, Format};
///
/// let format = Format::new().with_channels(2).with_auto_enable(false);
/// assert_eq!(format.channel_mode(), ChannelMode::Specified);
/// assert!(!format.is_complete());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Format {
    sample_rate: Option<u32>,
    channels: usize,
    channel_mode: ChannelMode,
    auto_enable: Option<bool>,
    wants_default_format_from_output: bool,
    layout: Layout,
}

impl Default for Format {
    fn default() -> Self {
        Self::new()
    }
}

impl Format {
    pub fn new() -> Self {
        Self {
            sample_rate: None,
            channels: 0,
            channel_mode: ChannelMode::MatchesInput,
            auto_enable: None,
            wants_default_format_from_output: false,
            layout: Layout::NonInterleaved,
        }
    }

    /// Fixes the channel count and switches the mode to [`ChannelMode::Specified`].
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self.channel_mode = ChannelMode::Specified;
        self
    }

    pub fn with_channel_mode(mut self, mode: ChannelMode) -> Self {
        self.channel_mode = mode;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Whether the node enables itself after initializing.
    pub fn with_auto_enable(mut self, enable: bool) -> Self {
        self.auto_enable = Some(enable);
        self
    }

    /// Take missing values from the output chain instead of the first input.
    pub fn with_wants_default_format_from_output(mut self, wants: bool) -> Self {
        self.wants_default_format_from_output = wants;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    #[inline]
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn channel_mode(&self) -> ChannelMode {
        self.channel_mode
    }

    #[inline]
    pub fn auto_enable(&self) -> Option<bool> {
        self.auto_enable
    }

    #[inline]
    pub fn wants_default_format_from_output(&self) -> bool {
        self.wants_default_format_from_output
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_complete(&self) -> bool {
        self.sample_rate.is_some() && self.channels > 0
    }

    /// The format a node with `role` actually uses.
    ///
    /// Generators have no inputs to default from, so whatever they leave
    /// unset comes from the output chain.
    pub(crate) fn normalized_for(mut self, role: crate::node::NodeRole) -> Self {
        if role == crate::node::NodeRole::Generator {
            if self.channel_mode == ChannelMode::MatchesInput {
                self.channel_mode = ChannelMode::MatchesOutput;
            }
            self.wants_default_format_from_output = true;
        }
        if self.channel_mode != ChannelMode::Specified {
            self.channels = 0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;

    #[test]
    fn generators_never_match_input() {
        let format = Format::new().normalized_for(NodeRole::Generator);
        assert_eq!(format.channel_mode(), ChannelMode::MatchesOutput);
        assert!(format.wants_default_format_from_output());
    }

    #[test]
    fn specified_generators_keep_their_channels() {
        let format = Format::new().with_channels(1).normalized_for(NodeRole::Generator);
        assert_eq!(format.channel_mode(), ChannelMode::Specified);
        assert_eq!(format.channels(), 1);
        assert!(format.wants_default_format_from_output());
    }

    #[test]
    fn complete_needs_rate_and_channels() {
        assert!(!Format::new().with_sample_rate(48000).is_complete());
        assert!(Format::new().with_sample_rate(48000).with_channels(2).is_complete());
    }
}
