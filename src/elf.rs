//! ELF synthesizer (C2): builds the minimal loadable image described in
//! §4.2. Grounded on the original's `elf_gen.c` (referenced from
//! `ui.c`'s `_gen_child`), generalized from raw C struct writes to
//! explicit little-endian byte assembly — this crate has no
//! dependency capable of *writing* ELF (the pack's `goblin`-style
//! crates are readers), so the header is hand-built the way the
//! original tool hand-built it, just in safe Rust instead of C structs
//! cast over a buffer.

use crate::arch::{SupportedArch, PAGE_SIZE, TRAP_BYTE};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const EV_CURRENT: u32 = 1;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_R: u32 = 4;

/// An immutable, fully-built loadable image: headers on page 0, the
/// trap-seeded RX segment on page 1. Two pages total, always.
pub struct Image {
    bytes: Vec<u8>,
    entry: u64,
}

impl Image {
    /// Build the image for `arch`, with its single executable page
    /// mapped at `start` and entirely filled with the trap byte
    /// pattern. `start` must be page-aligned (validated by
    /// `Options::from_args`, so this asserts rather than returning a
    /// `Result`: reaching here with a misaligned start is a caller
    /// bug, not user input).
    pub fn build(arch: SupportedArch, start: u64) -> Image {
        assert_eq!(
            start % PAGE_SIZE as u64,
            0,
            "ELF synthesizer requires a page-aligned start address"
        );

        let mut bytes = vec![0u8; 2 * PAGE_SIZE];

        write_ehdr(&mut bytes[0..64], arch, start);
        write_phdr(&mut bytes[64..64 + 56], start);

        let code_page = &mut bytes[PAGE_SIZE..2 * PAGE_SIZE];
        code_page.fill(TRAP_BYTE);

        Image { bytes, entry: start }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }
}

fn write_ehdr(buf: &mut [u8], arch: SupportedArch, entry: u64) {
    debug_assert_eq!(buf.len(), 64);

    buf[0..4].copy_from_slice(&ELF_MAGIC);
    buf[4] = if arch.elf_class_is_64() { 2 } else { 1 }; // EI_CLASS
    buf[5] = 1; // EI_DATA: little-endian
    buf[6] = 1; // EI_VERSION
    buf[7] = 0; // EI_OSABI: ELFOSABI_NONE
                // buf[8]: EI_ABIVERSION, buf[9..16]: padding, already zeroed

    write_u16(&mut buf[16..18], ET_EXEC);
    write_u16(&mut buf[18..20], arch.elf_machine());
    write_u32(&mut buf[20..24], EV_CURRENT);
    write_u64(&mut buf[24..32], entry); // e_entry
    write_u64(&mut buf[32..40], 64); // e_phoff: right after this header
    write_u64(&mut buf[40..48], 0); // e_shoff: no section headers
    write_u32(&mut buf[48..52], 0); // e_flags
    write_u16(&mut buf[52..54], 64); // e_ehsize
    write_u16(&mut buf[54..56], 56); // e_phentsize (Elf64_Phdr)
    write_u16(&mut buf[56..58], 1); // e_phnum
    write_u16(&mut buf[58..60], 0); // e_shentsize
    write_u16(&mut buf[60..62], 0); // e_shnum
    write_u16(&mut buf[62..64], 0); // e_shstrndx
}

/// Writes the sole `PT_LOAD` program header. Its file offset is pinned
/// to `PAGE_SIZE` (page 1 of the image) rather than 0, so the header
/// page itself is never covered by a loaded segment: the kernel
/// enforces `p_offset ≡ p_vaddr (mod page size)`, and since `start` is
/// required page-aligned, `p_offset = PAGE_SIZE` satisfies that while
/// keeping `p_vaddr` exactly `start` and `p_filesz`/`p_memsz` exactly
/// one page, as required.
fn write_phdr(buf: &mut [u8], vaddr: u64) {
    debug_assert_eq!(buf.len(), 56);

    write_u32(&mut buf[0..4], PT_LOAD);
    write_u32(&mut buf[4..8], PF_R | PF_X);
    write_u64(&mut buf[8..16], PAGE_SIZE as u64); // p_offset
    write_u64(&mut buf[16..24], vaddr); // p_vaddr
    write_u64(&mut buf[24..32], vaddr); // p_paddr
    write_u64(&mut buf[32..40], PAGE_SIZE as u64); // p_filesz
    write_u64(&mut buf[40..48], PAGE_SIZE as u64); // p_memsz
    write_u64(&mut buf[48..56], PAGE_SIZE as u64); // p_align
}

fn write_u16(buf: &mut [u8], v: u16) {
    buf.copy_from_slice(&v.to_le_bytes());
}
fn write_u32(buf: &mut [u8], v: u32) {
    buf.copy_from_slice(&v.to_le_bytes());
}
fn write_u64(buf: &mut [u8], v: u64) {
    buf.copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_exactly_two_pages() {
        let img = Image::build(SupportedArch::X64, 0x400000);
        assert_eq!(img.as_bytes().len(), 2 * PAGE_SIZE);
    }

    #[test]
    fn magic_and_entry_are_correct() {
        let img = Image::build(SupportedArch::X64, 0x400000);
        assert_eq!(&img.as_bytes()[0..4], &ELF_MAGIC);
        assert_eq!(img.entry(), 0x400000);
        let entry_field = u64::from_le_bytes(img.as_bytes()[24..32].try_into().unwrap());
        assert_eq!(entry_field, 0x400000);
    }

    #[test]
    fn code_page_is_entirely_trap_bytes() {
        let img = Image::build(SupportedArch::X64, 0x400000);
        let code_page = &img.as_bytes()[PAGE_SIZE..2 * PAGE_SIZE];
        assert!(code_page.iter().all(|&b| b == TRAP_BYTE));
    }

    #[test]
    fn program_header_offset_satisfies_page_congruence() {
        let img = Image::build(SupportedArch::X64, 0x500000);
        let phdr = &img.as_bytes()[64..64 + 56];
        let p_offset = u64::from_le_bytes(phdr[8..16].try_into().unwrap());
        let p_vaddr = u64::from_le_bytes(phdr[16..24].try_into().unwrap());
        assert_eq!(p_offset % PAGE_SIZE as u64, p_vaddr % PAGE_SIZE as u64);
        assert_eq!(p_offset, PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "page-aligned")]
    fn rejects_misaligned_start() {
        Image::build(SupportedArch::X64, 0x400001);
    }

    #[test]
    fn x86_uses_32_bit_class_and_machine() {
        let img = Image::build(SupportedArch::X86, 0x400000);
        assert_eq!(img.as_bytes()[4], 1); // ELFCLASS32
        let machine = u16::from_le_bytes(img.as_bytes()[18..20].try_into().unwrap());
        assert_eq!(machine, 3); // EM_386
    }
}
