//! Concrete watchdog conditions.

pub mod heap_fragmentation;
pub mod memory_growth;

pub use heap_fragmentation::HeapFragmentation;
pub use memory_growth::MemoryGrowth;
