pub mod channel;

pub use channel::{ChannelSource, ReadingSender};
