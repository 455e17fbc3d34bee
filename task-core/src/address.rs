use crate::config::{MAXVA, PAGE_SIZE, PAGE_SIZE_BITS};
use core::fmt::{self, Debug, Formatter};

// usize 的简单包装, 以便在编译器帮助下进行类型安全的转换

/// Definitions
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtPageNum(pub usize);

/// Debugging

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#x}", self.0))
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}

/// T: {VirtAddr, VirtPageNum}
/// T -> usize: T.0
/// usize -> VirtAddr: usize.into()
impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self { Self(v) }
}
impl From<VirtAddr> for usize {
    fn from(v: VirtAddr) -> Self { v.0 }
}

impl VirtAddr {
    pub fn floor(&self) -> VirtPageNum { VirtPageNum(self.0 / PAGE_SIZE) }
    pub fn ceil(&self) -> VirtPageNum {
        if self.0 == 0 {
            VirtPageNum(0)
        } else {
            VirtPageNum((self.0 - 1 + PAGE_SIZE) / PAGE_SIZE)
        }
    }
    /// Whether the address lies below `MAXVA`.
    pub fn is_valid(&self) -> bool { self.0 < MAXVA }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self { Self(v.0 << PAGE_SIZE_BITS) }
}

/// Half-open range `[l, r)`.
#[derive(Copy, Clone, Debug)]
pub struct SimpleRange<T> where
    T: Copy + PartialEq + PartialOrd + Debug, {
    l: T,
    r: T,
}
impl<T> SimpleRange<T> where
    T: Copy + PartialEq + PartialOrd + Debug, {
    pub fn new(start: T, end: T) -> Self {
        assert!(start <= end, "start {:?} > end {:?}!", start, end);
        Self { l: start, r: end }
    }
    pub fn get_start(&self) -> T { self.l }
    pub fn get_end(&self) -> T { self.r }
    pub fn contains(&self, t: &T) -> bool { self.l <= *t && *t < self.r }
    pub fn overlaps(&self, other: &Self) -> bool {
        self.l < other.r && other.l < self.r
    }
}
pub type VPNRange = SimpleRange<VirtPageNum>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_and_ceil() {
        let va = VirtAddr(0x1001);
        assert_eq!(va.floor(), VirtPageNum(1));
        assert_eq!(va.ceil(), VirtPageNum(2));
        assert_eq!(VirtAddr(0x2000).ceil(), VirtPageNum(2));
        assert_eq!(VirtAddr(0).ceil(), VirtPageNum(0));
        assert_eq!(VirtAddr::from(VirtPageNum(3)), VirtAddr(0x3000));
    }

    #[test]
    fn range_overlap() {
        let a = VPNRange::new(VirtPageNum(1), VirtPageNum(4));
        let b = VPNRange::new(VirtPageNum(4), VirtPageNum(6));
        let c = VPNRange::new(VirtPageNum(3), VirtPageNum(5));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(a.contains(&VirtPageNum(3)));
        assert!(!a.contains(&VirtPageNum(4)));
        assert!(VirtAddr(MAXVA - 1).is_valid());
        assert!(!VirtAddr(MAXVA).is_valid());
    }
}
