//! Memory Probe: current free system memory.

#[cfg(target_os = "linux")]
#[path = "memory_linux.rs"]
mod platform;

#[cfg(not(target_os = "linux"))]
#[path = "memory_other.rs"]
mod platform;

/// Source of the current free-memory reading used by the chunk planner.
pub trait MemoryProbe: Send + Sync + 'static {
    /// Returns free memory in bytes, or 0 when it cannot be determined.
    fn available_memory(&self) -> u64;
}

/// Reads free memory from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_memory(&self) -> u64 {
        platform::read_available_memory()
    }
}

/// Probe that always reports the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_memory(&self) -> u64 {
        self.0
    }
}
