//! Error types for graph construction and control.

use thiserror::Error;

/// Coarse classification of a [`GraphError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid topology or missing collaborator, reported at the call site.
    Configuration,
    /// Out-of-range or unsupported parameter value.
    Parameter,
    /// Formats could not be negotiated.
    Format,
    /// The device or a native voice failed.
    Platform,
    /// Reading or decoding a source file failed.
    Io,
}

/// Errors raised by control-thread operations.
///
/// Nothing on the render thread returns these; it degrades to silence instead.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A target node was asked to feed another node
    #[error("{node} is a target and does not have outputs")]
    TargetHasNoOutputs {
        /// Name of the target node.
        node: String,
    },

    /// A generator was used as a connection destination
    #[error("{node} is a generator and does not accept inputs")]
    GeneratorHasNoInputs {
        /// Name of the generator node.
        node: String,
    },

    /// The destination has no room for the requested input bus
    #[error("input bus {bus} exceeds the capacity of {node} ({capacity} inputs)")]
    InputCapacity {
        /// Name of the destination node.
        node: String,
        /// Requested bus.
        bus: usize,
        /// Number of input slots the node provides.
        capacity: usize,
    },

    /// The connection would close a loop
    #[error("connecting {from} to {to} would create a cycle")]
    Cycle {
        /// Upstream node of the rejected connection.
        from: String,
        /// Downstream node of the rejected connection.
        to: String,
    },

    /// Both ends of a connection already belong to different contexts
    #[error("{node} belongs to a different context")]
    ForeignContext {
        /// Name of the node that was attached elsewhere.
        node: String,
    },

    /// No target was set and no device manager could supply one
    #[error("context has no target and no device manager to create one")]
    NoTarget,

    /// A generic node sits behind a native node feeding a native chain
    #[error("generic node {node} cannot feed native node {consumer} from behind native node {native}")]
    GenericAfterNative {
        /// The generic input.
        node: String,
        /// The native consumer being initialized.
        consumer: String,
        /// The native node found upstream without an adapter.
        native: String,
    },

    /// A native consumer needs an adapter but the context has no backend
    #[error("node {node} needs a voice adapter but the context has no native backend")]
    NoNativeBackend {
        /// The native consumer.
        node: String,
    },

    /// Bus index at or beyond the mixer's limit
    #[error("bus index {bus} out of range (max busses: {max})")]
    BusOutOfRange {
        /// Requested bus.
        bus: usize,
        /// Current bus limit.
        max: usize,
    },

    /// Nothing is connected at the bus
    #[error("no node at bus index {bus}")]
    BusUnoccupied {
        /// Requested bus.
        bus: usize,
    },

    /// The bus limit cannot shrink below the active busses
    #[error("cannot limit busses to {requested}: {reason}")]
    BusLimit {
        /// Requested limit.
        requested: usize,
        /// What is still connected.
        reason: String,
    },

    /// Panning only works on mono or stereo mixers
    #[error("pan is only supported for stereo, mixer has {channels} channels")]
    UnsupportedPan {
        /// Channel count of the mixer.
        channels: usize,
    },

    /// Generic invalid parameter
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        param: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The node's channel count or sample rate could not be determined
    #[error("could not resolve the format of {node} (sample rate: {sample_rate:?}, channels: {channels})")]
    IncompleteFormat {
        /// Node whose format stayed incomplete.
        node: String,
        /// Sample rate found so far.
        sample_rate: Option<u32>,
        /// Channel count found so far.
        channels: usize,
    },

    /// Two connected nodes disagree on the sample rate
    #[error("{input} runs at {found} Hz but {node} expects {expected} Hz")]
    SampleRateMismatch {
        /// Consuming node.
        node: String,
        /// Producing node.
        input: String,
        /// Rate of the consumer.
        expected: u32,
        /// Rate of the producer.
        found: u32,
    },

    /// The requested channel layout cannot be provided
    #[error("{node} cannot provide {requested} channels (available: {available})")]
    UnsupportedChannels {
        /// Node or device name.
        node: String,
        /// Requested channel count.
        requested: usize,
        /// Channels available.
        available: usize,
    },

    /// A node's message queue has no room left
    #[error("message queue of {node} is full")]
    QueueFull {
        /// Name of the receiving node.
        node: String,
    },

    /// Device failure
    #[error("device error: {0}")]
    Device(String),

    /// Native voice or engine failure
    #[error("native backend error: {0}")]
    Native(String),

    /// Failed to read from a source file
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode a source file
    #[error("failed to decode source: {0}")]
    Decode(String),
}

impl GraphError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        use GraphError::*;
        match self {
            TargetHasNoOutputs { .. }
            | GeneratorHasNoInputs { .. }
            | InputCapacity { .. }
            | Cycle { .. }
            | ForeignContext { .. }
            | NoTarget
            | GenericAfterNative { .. }
            | NoNativeBackend { .. }
            | QueueFull { .. } => ErrorKind::Configuration,
            BusOutOfRange { .. }
            | BusUnoccupied { .. }
            | BusLimit { .. }
            | UnsupportedPan { .. }
            | InvalidParameter { .. } => ErrorKind::Parameter,
            IncompleteFormat { .. } | SampleRateMismatch { .. } | UnsupportedChannels { .. } => {
                ErrorKind::Format
            }
            Device(_) | Native(_) => ErrorKind::Platform,
            Io(_) | Decode(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        GraphError::InvalidParameter {
            param,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_name_the_bus() {
        let err = GraphError::BusOutOfRange { bus: 12, max: 10 };
        assert_eq!(err.to_string(), "bus index 12 out of range (max busses: 10)");
        assert_eq!(err.kind(), ErrorKind::Parameter);

        let err = GraphError::BusUnoccupied { bus: 3 };
        assert!(err.to_string().contains("bus index 3"));
    }

    #[test]
    fn target_error_message() {
        let err = GraphError::TargetHasNoOutputs {
            node: "LineOut".into(),
        };
        assert_eq!(err.to_string(), "LineOut is a target and does not have outputs");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn format_errors_are_classified() {
        let err = GraphError::SampleRateMismatch {
            node: "Gain".into(),
            input: "FilePlayer".into(),
            expected: 44100,
            found: 22050,
        };
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("22050"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.ogg");
        let err: GraphError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
