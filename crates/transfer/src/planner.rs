//! Chunk Size Planner.
//!
//! Picks a per-transfer chunk size that shares RAM fairly between concurrent
//! transfers and grows logarithmically with the file size.

use crate::{BASE_CHUNK_SIZE, MemoryConfig, PAGE_SIZE};

/// Chunk geometry handed back to the client by `CreateConnection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Chunk size in bytes (always > 0).
    pub chunk_size: u64,
    /// Number of chunks covering the whole file.
    pub chunk_count: u64,
}

/// Computes the chunk plan for a file of `file_size` bytes.
///
/// `free_memory` is the Memory Probe reading and `active_transfers` the
/// Registry's floored-at-one active count.
pub fn plan_chunks(
    memory: &MemoryConfig,
    free_memory: u64,
    active_transfers: usize,
    file_size: u64,
) -> ChunkPlan {
    // Bounds are normalized so any config yields a non-zero size in [min, max].
    let min = memory.min_chunk_size.max(1);
    let max = memory.max_chunk_size.max(min);

    let chunk_size = if file_size < min {
        // Whole file in one chunk.
        file_size.max(1)
    } else {
        let ram_budget =
            memory.available_ram.min(free_memory) / active_transfers.max(1) as u64;
        let size_based = size_based_chunk(file_size);
        let candidate = ram_budget.min(size_based).min(max).max(min);
        page_align_within(candidate, min, max)
    };

    ChunkPlan {
        chunk_size,
        chunk_count: file_size.div_ceil(chunk_size),
    }
}

/// `BASE * log2(size / BASE + 1)`: sub-linear in the file size.
fn size_based_chunk(file_size: u64) -> u64 {
    let base = BASE_CHUNK_SIZE as f64;
    (base * (file_size as f64 / base + 1.0).log2()) as u64
}

/// Rounds down to a page multiple when larger than one page.
fn round_to_page(size: u64) -> u64 {
    if size > PAGE_SIZE {
        size / PAGE_SIZE * PAGE_SIZE
    } else {
        size
    }
}

/// Page-aligns `candidate` without leaving `[min, max]`. When no page
/// multiple fits the bounds the unaligned candidate is kept.
fn page_align_within(candidate: u64, min: u64, max: u64) -> u64 {
    let down = round_to_page(candidate);
    if down >= min {
        return down;
    }
    let up = min.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    if up <= max { up } else { candidate }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    fn memory() -> MemoryConfig {
        MemoryConfig {
            available_ram: GIB,
            max_chunk_size: 512 * MIB,
            min_chunk_size: 4 * KIB,
        }
    }

    #[test]
    fn small_file_is_single_chunk() {
        let plan = plan_chunks(&memory(), 8 * GIB, 1, 93);
        assert_eq!(plan.chunk_size, 93);
        assert_eq!(plan.chunk_count, 1);
    }

    #[test]
    fn file_just_below_minimum_is_single_chunk() {
        let plan = plan_chunks(&memory(), 8 * GIB, 1, 4 * KIB - 1);
        assert_eq!(plan.chunk_size, 4 * KIB - 1);
        assert_eq!(plan.chunk_count, 1);
    }

    #[test]
    fn ram_share_limits_chunk_size() {
        let mem = MemoryConfig {
            available_ram: MIB,
            ..memory()
        };
        // 1 MiB split between four transfers.
        let plan = plan_chunks(&mem, 8 * GIB, 4, GIB);
        assert_eq!(plan.chunk_size, 256 * KIB);
        assert_eq!(plan.chunk_count, GIB / (256 * KIB));
    }

    #[test]
    fn free_memory_below_configured_ram_wins() {
        let plan = plan_chunks(&memory(), 64 * KIB, 1, GIB);
        assert_eq!(plan.chunk_size, 64 * KIB);
    }

    #[test]
    fn zero_free_memory_falls_back_to_minimum() {
        let plan = plan_chunks(&memory(), 0, 1, 100 * MIB);
        assert_eq!(plan.chunk_size, 4 * KIB);
        assert_eq!(plan.chunk_count, 100 * MIB / (4 * KIB));
    }

    #[test]
    fn zero_active_transfers_does_not_divide_by_zero() {
        let plan = plan_chunks(&memory(), 8 * GIB, 0, 10 * MIB);
        assert!(plan.chunk_size >= 4 * KIB);
    }

    #[test]
    fn maximum_bound_is_respected() {
        let mem = MemoryConfig {
            max_chunk_size: 64 * KIB,
            ..memory()
        };
        let plan = plan_chunks(&mem, 8 * GIB, 1, 100 * GIB);
        assert_eq!(plan.chunk_size, 64 * KIB);
    }

    #[test]
    fn chunk_size_grows_sub_linearly() {
        let small = plan_chunks(&memory(), 8 * GIB, 1, 10 * MIB).chunk_size;
        let large = plan_chunks(&memory(), 8 * GIB, 1, 10 * GIB).chunk_size;
        assert!(large > small);
        assert!(large < small * 1000 / 8);
    }

    #[test]
    fn zero_minimum_with_zero_free_memory_still_plans() {
        let mem = MemoryConfig {
            min_chunk_size: 0,
            ..memory()
        };
        let plan = plan_chunks(&mem, 0, 1, 10 * MIB);
        assert!(plan.chunk_size > 0);
        assert_eq!(plan.chunk_count, (10 * MIB).div_ceil(plan.chunk_size));
    }

    #[test]
    fn inverted_bounds_do_not_panic() {
        let mem = MemoryConfig {
            min_chunk_size: 64 * KIB,
            max_chunk_size: 8 * KIB,
            ..memory()
        };
        let plan = plan_chunks(&mem, 8 * GIB, 1, 10 * MIB);
        assert_eq!(plan.chunk_size, 64 * KIB);
        assert_eq!(plan.chunk_count, 160);
    }

    #[test]
    fn unaligned_minimum_is_not_undercut() {
        let mem = MemoryConfig {
            min_chunk_size: 5000,
            ..memory()
        };
        let plan = plan_chunks(&mem, 0, 1, 10 * MIB);
        assert_eq!(plan.chunk_size, 2 * PAGE_SIZE);

        // No page multiple fits [5000, 6000]: keep the bounded size.
        let tight = MemoryConfig {
            min_chunk_size: 5000,
            max_chunk_size: 6000,
            ..memory()
        };
        let plan = plan_chunks(&tight, 0, 1, 10 * MIB);
        assert_eq!(plan.chunk_size, 5000);
    }

    #[test]
    fn geometry_invariants_hold_across_sizes() {
        let mem = memory();
        let mut size = 1u64;
        while size < 200 * GIB {
            for file_size in [size, size + 1, size * 3 / 2 + 7] {
                for active in [1, 3, 64] {
                    let plan = plan_chunks(&mem, 2 * GIB, active, file_size);

                    if file_size < mem.min_chunk_size {
                        assert_eq!(plan.chunk_size, file_size, "size {file_size}");
                    } else {
                        assert!(plan.chunk_size >= mem.min_chunk_size, "size {file_size}");
                        assert!(plan.chunk_size <= mem.max_chunk_size, "size {file_size}");
                        if plan.chunk_size > PAGE_SIZE {
                            assert_eq!(plan.chunk_size % PAGE_SIZE, 0, "size {file_size}");
                        }
                    }
                    assert_eq!(plan.chunk_count, file_size.div_ceil(plan.chunk_size));
                }
            }
            size *= 2;
        }
    }
}
