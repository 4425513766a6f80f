mod sharded;
mod sized;
mod timed;

pub use sharded::ShardedByteCache;
pub use sized::SizedByteCache;
pub use timed::TimedByteCache;
