//! The handful of AArch64 encodings the discovery pass understands.
//!
//! Address formation in compiler output is page-relative: an `ADRP`
//! computes the 4 KiB page of a target, and a following `ADD` or `LDR`
//! supplies the low 12 bits. Walking those pairs is enough to find every
//! selector reference and global load the discovery needs.

pub const INSN_SIZE: u64 = 4;

pub const PACIBSP: u32 = 0xD503_237F;
const BTI_MASK: u32 = 0xFFFF_FF3F;
const BTI_BITS: u32 = 0xD503_241F;
const STP_FP_LR_PRE_MASK: u32 = 0xFFC0_7FFF;
const STP_FP_LR_PRE_BITS: u32 = 0xA980_7BFD;
const SUB_SP_MASK: u32 = 0xFFC0_03FF;
const SUB_SP_BITS: u32 = 0xD100_03FF;

/// `ADRP xd, page` → `(rd, resolved_page_address)`.
pub fn decode_adrp(insn: u32, pc: u64) -> Option<(u8, u64)> {
    if insn & 0x9F00_0000 != 0x9000_0000 {
        return None;
    }
    let rd = (insn & 0x1F) as u8;
    let immlo = u64::from((insn >> 29) & 0x3);
    let immhi = u64::from((insn >> 5) & 0x7_FFFF);
    let imm21 = (immhi << 2) | immlo;
    // sign-extend 21 bits, scale to pages
    let imm = ((imm21 << 43) as i64 >> 43) << 12;
    Some((rd, (pc & !0xFFF).wrapping_add(imm as u64)))
}

/// `ADD xd, xn, #imm` (64-bit, no shift) → `(rd, rn, imm)`.
pub fn decode_add_imm(insn: u32) -> Option<(u8, u8, u64)> {
    if insn & 0xFFC0_0000 != 0x9100_0000 {
        return None;
    }
    let rd = (insn & 0x1F) as u8;
    let rn = ((insn >> 5) & 0x1F) as u8;
    let imm = u64::from((insn >> 10) & 0xFFF);
    Some((rd, rn, imm))
}

/// `LDR xt, [xn, #imm]` (64-bit, unsigned offset) → `(rt, rn, imm)`.
pub fn decode_ldr_imm(insn: u32) -> Option<(u8, u8, u64)> {
    if insn & 0xFFC0_0000 != 0xF940_0000 {
        return None;
    }
    let rt = (insn & 0x1F) as u8;
    let rn = ((insn >> 5) & 0x1F) as u8;
    let imm = u64::from((insn >> 10) & 0xFFF) * 8;
    Some((rt, rn, imm))
}

/// Function-entry shapes: pointer-auth sign, branch-target id, frame push,
/// or stack allocation.
pub fn is_prologue(insn: u32) -> bool {
    insn == PACIBSP
        || insn & BTI_MASK == BTI_BITS
        || insn & STP_FP_LR_PRE_MASK == STP_FP_LR_PRE_BITS
        || insn & SUB_SP_MASK == SUB_SP_BITS
}

pub fn encode_adrp(rd: u8, pc: u64, target: u64) -> u32 {
    let delta = ((target & !0xFFF) as i64).wrapping_sub((pc & !0xFFF) as i64) >> 12;
    let imm21 = (delta as u64) & 0x1F_FFFF;
    let immlo = (imm21 & 0x3) as u32;
    let immhi = ((imm21 >> 2) & 0x7_FFFF) as u32;
    0x9000_0000 | (immlo << 29) | (immhi << 5) | u32::from(rd & 0x1F)
}

pub fn encode_add_imm(rd: u8, rn: u8, imm: u64) -> u32 {
    0x9100_0000 | (((imm & 0xFFF) as u32) << 10) | (u32::from(rn & 0x1F) << 5) | u32::from(rd & 0x1F)
}

pub fn encode_ldr_imm(rt: u8, rn: u8, imm: u64) -> u32 {
    0xF940_0000
        | ((((imm / 8) & 0xFFF) as u32) << 10)
        | (u32::from(rn & 0x1F) << 5)
        | u32::from(rt & 0x1F)
}

/// `STP x29, x30, [sp, #-N]!`
pub fn encode_stp_fp_lr_pre(bytes: i16) -> u32 {
    let imm7 = ((bytes / 8) as u32) & 0x7F;
    STP_FP_LR_PRE_BITS | (imm7 << 15)
}

pub const RET: u32 = 0xD65F_03C0;
pub const NOP: u32 = 0xD503_201F;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adrp_round_trip() {
        let pc = 0x1_0000_4010;
        for target in [0x1_0000_8000u64, 0x1_0000_9000, 0x0_FFFF_F000] {
            let insn = encode_adrp(3, pc, target);
            let (rd, page) = decode_adrp(insn, pc).unwrap();
            assert_eq!(rd, 3);
            assert_eq!(page, target & !0xFFF, "target {target:#x}");
        }
    }

    #[test]
    fn adrp_rejects_other_instructions() {
        assert_eq!(decode_adrp(NOP, 0), None);
        assert_eq!(decode_adrp(RET, 0), None);
        // ADR (op bit clear) is not ADRP
        assert_eq!(decode_adrp(0x1000_0000, 0), None);
    }

    #[test]
    fn add_round_trip() {
        let insn = encode_add_imm(1, 2, 0x123);
        assert_eq!(decode_add_imm(insn), Some((1, 2, 0x123)));
        assert_eq!(decode_add_imm(NOP), None);
    }

    #[test]
    fn ldr_round_trip() {
        let insn = encode_ldr_imm(5, 6, 0x40);
        assert_eq!(decode_ldr_imm(insn), Some((5, 6, 0x40)));
        assert_eq!(decode_ldr_imm(NOP), None);
    }

    #[test]
    fn prologue_shapes() {
        assert!(is_prologue(PACIBSP));
        assert!(is_prologue(0xD503_245F)); // bti c
        assert!(is_prologue(encode_stp_fp_lr_pre(-16)));
        assert!(is_prologue(0xD100_43FF)); // sub sp, sp, #16
        assert!(!is_prologue(NOP));
        assert!(!is_prologue(RET));
    }
}
