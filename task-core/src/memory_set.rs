use crate::address::{VPNRange, VirtAddr, VirtPageNum};
use crate::config::{MAXVA, PAGE_SIZE, TRAMPOLINE, TRAP_CONTEXT, USER_STACK_SIZE};
use crate::error::{Result, TaskError};
use alloc::vec::Vec;
use bitflags::bitflags;
use log::trace;

bitflags! {
    // 仅保留 U/R/W/X 四个标志位, 与页表项标志位的位置一致
    pub struct MapPermission: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
    }
}

/// A region requested by [`ProcessTable::create`](crate::ProcessTable::create).
#[derive(Copy, Clone, Debug)]
pub struct MapRequest {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub perm: MapPermission,
}

impl MapRequest {
    pub fn new(start: usize, end: usize, perm: MapPermission) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            perm,
        }
    }
}

// 逻辑段: 一段地址连续的虚拟页面, 具有相同的访问权限
// 页表本身不归这里管, 因此只记录区间与权限
#[derive(Clone, Debug)]
pub struct MapArea {
    pub vpn_range: VPNRange,
    map_perm: MapPermission,
}

impl MapArea {
    // 起始/终止虚拟地址分别下取整/上取整为虚拟页号
    pub fn new(start_va: VirtAddr, end_va: VirtAddr, map_perm: MapPermission) -> Self {
        let start_vpn: VirtPageNum = start_va.floor();
        let end_vpn: VirtPageNum = end_va.ceil();
        Self {
            vpn_range: VPNRange::new(start_vpn, end_vpn),
            map_perm,
        }
    }
    pub fn from_another(another: &MapArea) -> Self {
        Self {
            vpn_range: VPNRange::new(another.vpn_range.get_start(), another.vpn_range.get_end()),
            map_perm: another.map_perm,
        }
    }
    pub fn perm(&self) -> MapPermission {
        self.map_perm
    }
    pub fn page_count(&self) -> usize {
        self.vpn_range.get_end().0 - self.vpn_range.get_start().0
    }
    pub fn have_mapped(&self, vpn: &VirtPageNum) -> bool {
        self.vpn_range.contains(vpn)
    }
}

/// Address-space descriptor bound to a process at creation.
///
/// The lifecycle code treats it as an opaque handle: it is built once,
/// copied by `fork`, replaced by `exec` and dropped exactly once when the
/// owning process exits.
#[derive(Debug, Default)]
pub struct MemorySet {
    areas: Vec<MapArea>,
}

impl MemorySet {
    pub fn new_bare() -> Self {
        Self { areas: Vec::new() }
    }
    pub fn areas(&self) -> impl Iterator<Item = &MapArea> + '_ {
        self.areas.iter()
    }
    pub fn page_count(&self) -> usize {
        self.areas.iter().map(MapArea::page_count).sum()
    }
    pub fn have_mapped(&self, vpn: &VirtPageNum) -> bool {
        self.areas.iter().any(|area| area.have_mapped(vpn))
    }
    /// Inserts an area, rejecting anything that reaches past `MAXVA` or
    /// overlaps an existing area.
    pub fn push(&mut self, map_area: MapArea) -> Result<()> {
        let end_va: VirtAddr = map_area.vpn_range.get_end().into();
        if end_va.0 > MAXVA {
            return Err(TaskError::AddressOutOfRange(end_va));
        }
        if let Some(other) = self
            .areas
            .iter()
            .find(|area| area.vpn_range.overlaps(&map_area.vpn_range))
        {
            let first = core::cmp::max(other.vpn_range.get_start(), map_area.vpn_range.get_start());
            return Err(TaskError::AlreadyMapped(first));
        }
        trace!(
            "map [{:?}, {:?}) {:?}",
            map_area.vpn_range.get_start(),
            map_area.vpn_range.get_end(),
            map_area.map_perm
        );
        self.areas.push(map_area);
        Ok(())
    }
    pub fn insert_framed_area(
        &mut self,
        start_va: VirtAddr,
        end_va: VirtAddr,
        permission: MapPermission,
    ) -> Result<()> {
        if start_va > end_va || !start_va.is_valid() {
            return Err(TaskError::AddressOutOfRange(start_va));
        }
        if end_va.0 > MAXVA {
            return Err(TaskError::AddressOutOfRange(end_va));
        }
        self.push(MapArea::new(start_va, end_va, permission))
    }
    pub fn from_requests(requests: &[MapRequest]) -> Result<Self> {
        let mut memory_set = Self::new_bare();
        for request in requests {
            memory_set.insert_framed_area(request.start, request.end, request.perm)?;
        }
        Ok(memory_set)
    }
    /// Include sections in elf and TrapContext and user stack,
    /// also returns user_sp and entry point.
    ///
    /// `elf_data` must be 8-byte aligned, as for any in-place ELF parse.
    pub fn from_elf(elf_data: &[u8]) -> Result<(Self, usize, usize)> {
        let mut memory_set = Self::new_bare();
        let elf = xmas_elf::ElfFile::new(elf_data).map_err(TaskError::BadElf)?;
        let elf_header = elf.header;
        let magic = elf_header.pt1.magic;
        if magic != [0x7f, 0x45, 0x4c, 0x46] {
            return Err(TaskError::BadElf("invalid elf magic"));
        }
        let ph_count = elf_header.pt2.ph_count();
        check_program_headers(&elf, elf_data.len())?;
        // 记录目前涉及到的最大的虚拟页号
        let mut max_end_vpn = VirtPageNum(0);
        for i in 0..ph_count {
            let ph = elf.program_header(i).map_err(TaskError::BadElf)?;
            if ph.get_type().map_err(TaskError::BadElf)? != xmas_elf::program::Type::Load {
                continue;
            }
            let file_end = ph
                .offset()
                .checked_add(ph.file_size())
                .ok_or(TaskError::BadElf("segment data overflows"))?;
            if file_end > elf_data.len() as u64 {
                return Err(TaskError::BadElf("segment data out of bounds"));
            }
            let start_va: VirtAddr = (ph.virtual_addr() as usize).into();
            let end = ph
                .virtual_addr()
                .checked_add(ph.mem_size())
                .ok_or(TaskError::AddressOutOfRange(start_va))?;
            let end_va: VirtAddr = (end as usize).into();
            let mut map_perm = MapPermission::U;
            let ph_flags = ph.flags();
            if ph_flags.is_read() { map_perm |= MapPermission::R; }
            if ph_flags.is_write() { map_perm |= MapPermission::W; }
            if ph_flags.is_execute() { map_perm |= MapPermission::X; }
            memory_set.insert_framed_area(start_va, end_va, map_perm)?;
            max_end_vpn = core::cmp::max(max_end_vpn, end_va.ceil());
        }
        // 在最高的段之上放置一个保护页面和用户栈
        let max_end_va: VirtAddr = max_end_vpn.into();
        let user_stack_bottom: usize = usize::from(max_end_va) + PAGE_SIZE;
        let user_stack_top = user_stack_bottom + USER_STACK_SIZE;
        memory_set.insert_framed_area(
            user_stack_bottom.into(),
            user_stack_top.into(),
            MapPermission::R | MapPermission::W | MapPermission::U,
        )?;
        // 次高页面存放 Trap 上下文
        memory_set.insert_framed_area(
            TRAP_CONTEXT.into(),
            TRAMPOLINE.into(),
            MapPermission::R | MapPermission::W,
        )?;
        Ok((
            memory_set,
            user_stack_top,
            elf.header.pt2.entry_point() as usize,
        ))
    }
    // 复制一个完全相同的地址空间
    pub fn from_existed_user(user_space: &MemorySet) -> MemorySet {
        Self {
            areas: user_space.areas.iter().map(MapArea::from_another).collect(),
        }
    }
}

// xmas-elf 按头部给出的偏移直接切片, 越界或未对齐的程序头表必须在这里拒绝
fn check_program_headers(elf: &xmas_elf::ElfFile, len: usize) -> Result<()> {
    let (min_entry_size, align) = match elf.header.pt1.class() {
        xmas_elf::header::Class::SixtyFour => (56, 8),
        xmas_elf::header::Class::ThirtyTwo => (32, 4),
        _ => return Err(TaskError::BadElf("unknown elf class")),
    };
    let pt2 = &elf.header.pt2;
    let entry_size = pt2.ph_entry_size() as u64;
    let ph_offset = pt2.ph_offset();
    if pt2.ph_count() > 0 && entry_size < min_entry_size {
        return Err(TaskError::BadElf("program header entry too small"));
    }
    if ph_offset % align != 0 || entry_size % align != 0 {
        return Err(TaskError::BadElf("program headers misaligned"));
    }
    let table_end = (pt2.ph_count() as u64)
        .checked_mul(entry_size)
        .and_then(|size| size.checked_add(ph_offset));
    match table_end {
        Some(end) if end <= len as u64 => Ok(()),
        _ => Err(TaskError::BadElf("program headers out of bounds")),
    }
}
