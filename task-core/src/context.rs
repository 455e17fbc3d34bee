//! Register accessors used for diagnostics.

/// Returns the caller's current stack pointer.
///
/// Read-only and side-effect free; used when logging the boot context.
#[inline(always)]
pub fn read_sp() -> usize {
    let sp: usize;
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("mv {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    // 其他架构: 用一个局部变量的地址近似
    #[cfg(not(any(target_arch = "riscv64", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let marker = 0u8;
        sp = &marker as *const u8 as usize;
    }
    sp
}

#[cfg(test)]
mod tests {
    use super::read_sp;

    #[test]
    fn sp_is_near_a_local() {
        let local = 0u64;
        let here = &local as *const u64 as usize;
        let sp = read_sp();
        assert_ne!(sp, 0);
        // 栈向下增长, 局部变量位于当前栈指针之上不远处
        assert!(here.abs_diff(sp) < 64 * 1024, "sp {:#x} far from {:#x}", sp, here);
    }
}
