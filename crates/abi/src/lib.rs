pub mod decode;
pub mod import;
pub mod model;
pub mod registry;

pub use decode::LogDecoder;
pub use model::{Args, Event, GraphUpdate};
pub use registry::{AbiRecord, AbiRegistry};
