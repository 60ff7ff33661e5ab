pub mod context;
pub mod handler;
pub mod ids;
pub mod propagation;
pub mod transaction;
