//! Record serialization and the recorder thread.

pub mod export;
pub mod record;
pub mod recorder;

pub use record::{DecodedRecord, HIT, MISS, TERMINATOR, UNUSED, read_records};
pub use recorder::Recorder;
