pub mod post;
pub mod pre;

pub use post::{FrameOutput, FrameResult, PostProcessor, SequenceInfo, TaskOutput, VideoResult};
pub use pre::{AnalysisInput, PreProcessor, Prepared};
