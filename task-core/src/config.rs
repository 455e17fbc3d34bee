// 页表&虚存机制: Sv39, 三级页表, 每级 9 位索引, 页内偏移 12 位
pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SIZE_BITS: usize = 0xc;
pub const PAGE_INDEX_BITS: usize = 9;
pub const PAGE_TABLE_LEVELS: usize = 3;

/// One beyond the highest usable virtual address.
///
/// This is one bit less than the Sv39 limit so that no legal address has the
/// top bit set and needs sign-extension.
pub const MAXVA: usize = 1 << (PAGE_INDEX_BITS * PAGE_TABLE_LEVELS + PAGE_SIZE_BITS - 1);

// 跳板放在最高的一个虚拟页面中, Trap 上下文紧随其下
pub const TRAMPOLINE: usize = MAXVA - PAGE_SIZE;
pub const TRAP_CONTEXT: usize = TRAMPOLINE - PAGE_SIZE;

pub const USER_STACK_SIZE: usize = PAGE_SIZE * 2;

// 进程表
pub const NPROC: usize = 64;
pub const INIT_PID: usize = 0;

/// Boot-time parameters of a [`ProcessTable`](crate::ProcessTable).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableConfig {
    /// Number of pre-allocated slots, the adopter's own slot included.
    pub capacity: usize,
    /// Identity of the adopter (init) process.
    pub init_pid: usize,
}

impl TableConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: NPROC,
            init_pid: INIT_PID,
        }
    }
}
