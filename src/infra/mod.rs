//! Spawner implementations: child processes and in-process tasks.

pub mod memory;
pub mod process;

pub use memory::InProcessSpawner;
pub use process::ProcessSpawner;
