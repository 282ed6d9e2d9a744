pub mod cassette;
pub mod equalizer;
pub mod errors;
pub mod interception;
pub mod memory_cassette;
pub mod recorder;
pub mod recording;

pub use cassette::{match_against_recorded_metadata, Cassette, RecordingLookup};
pub use equalizer::{
    CompareExecutionConfig, ComparatorResult, Comparison, EqualityStatus, Equalizer,
};
pub use errors::{OperationError, TapedeckError};
pub use interception::{
    CallArgs, CapturePolicy, CapturedArg, InputDataHandler, OutputDataHandler,
};
pub use memory_cassette::InMemoryCassette;
pub use recorder::{
    InputInterception, Output, OutputInterception, Playback, Recorder, RecordingParameters,
};
pub use recording::Recording;
