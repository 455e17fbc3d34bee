//! Hand-assembled ELF64 images for tests.

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const IMAGE_SIZE: usize = 512;

// xmas-elf 原地解析头部, 缓冲区必须 8 字节对齐
#[repr(C, align(8))]
pub struct ElfImage {
    bytes: [u8; IMAGE_SIZE],
    len: usize,
}

impl ElfImage {
    /// `segments` are `(vaddr, memsz, flags)` of `PT_LOAD` headers without file data.
    pub fn build(entry: u64, segments: &[(u64, u64, u32)]) -> Self {
        assert!(EHDR_SIZE + segments.len() * PHDR_SIZE <= IMAGE_SIZE);
        let mut image = Self {
            bytes: [0; IMAGE_SIZE],
            len: EHDR_SIZE + segments.len() * PHDR_SIZE,
        };
        let b = &mut image.bytes;
        b[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        b[4] = 2; // ELFCLASS64
        b[5] = 1; // little endian
        b[6] = 1; // EV_CURRENT
        b[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        b[18..20].copy_from_slice(&0xf3u16.to_le_bytes()); // EM_RISCV
        b[20..24].copy_from_slice(&1u32.to_le_bytes());
        b[24..32].copy_from_slice(&entry.to_le_bytes());
        b[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        b[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        b[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        b[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());
        b[58..60].copy_from_slice(&64u16.to_le_bytes());
        for (i, (vaddr, memsz, flags)) in segments.iter().enumerate() {
            let ph = &mut b[EHDR_SIZE + i * PHDR_SIZE..EHDR_SIZE + (i + 1) * PHDR_SIZE];
            ph[0..4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
            ph[4..8].copy_from_slice(&flags.to_le_bytes());
            ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
            ph[24..32].copy_from_slice(&vaddr.to_le_bytes());
            ph[40..48].copy_from_slice(&memsz.to_le_bytes());
            ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        }
        image
    }

    pub fn corrupt_magic(&mut self) {
        self.bytes[1] = b'X';
    }

    /// Rewrites `e_phoff`, `e_phentsize` and `e_phnum` without touching the
    /// image length.
    pub fn set_program_headers(&mut self, offset: u64, entry_size: u16, count: u16) {
        self.bytes[32..40].copy_from_slice(&offset.to_le_bytes());
        self.bytes[54..56].copy_from_slice(&entry_size.to_le_bytes());
        self.bytes[56..58].copy_from_slice(&count.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
