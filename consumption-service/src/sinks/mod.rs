pub mod accumulator;

pub use accumulator::{AccumulatorSink, ShardedAccumulatorSink};
