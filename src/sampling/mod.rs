pub mod adaptive_sampler;
pub mod priority;
pub mod random;

pub use adaptive_sampler::{AdaptiveSampler, SamplerError};
pub use priority::TracePriority;
pub use random::RandomSource;
