//! Finding the Dock's private space machinery.
//!
//! Seven entities drive the payload: two global object pointers
//! (`dock_spaces`, `dppm`) and five functions (`add_space`, `remove_space`,
//! `move_space`, `set_front_window`, `fix_animation`). None are exported,
//! so they are recovered from the Dock image with three escalating
//! techniques:
//!
//! 1. selector lookup: selector string → selref entry → `ADRP`+`LDR` pair
//!    in `__text` that loads it → walk back to the enclosing prologue;
//! 2. global reference: locate a function by its selector, then scan its
//!    first instructions for an `ADRP`+`ADD`/`LDR` landing in a data
//!    segment;
//! 3. byte-pattern fallback with wildcards, including the
//!    `ADRP`+`LDR`+`LDR` double-dereference signature.

use serde::Serialize;
use tracing::debug;

use crate::sa::insn::{self, INSN_SIZE};
use crate::sa::macho::{MachImage, SECT_OBJC_METHNAME, SECT_OBJC_SELREFS, SECT_TEXT, SEG_DATA, SEG_TEXT};
use crate::sa::pattern::Pattern;
use crate::sa::protocol::Capabilities;

pub const SEL_ADD_SPACE: &str = "addSpace:";
pub const SEL_REMOVE_SPACE: &str = "removeSpace:";
pub const SEL_MOVE_SPACE: &str = "moveSpace:toDisplay:";
/// The handler that touches the spaces controller global early on.
pub const SEL_ACTIVE_SPACE_CHANGED: &str = "activeSpaceDidChange:";

/// Instruction-byte signatures for the two functions with no selector of
/// their own. Tuned per OS release; wildcards cover the bits the compiler
/// is free to choose.
pub const SET_FRONT_WINDOW_PATTERN: &str =
    "7F 23 03 D5 FD 7B BF A9 FD 03 00 91 ?? ?? ?? ?? 68 00 80 52";
pub const FIX_ANIMATION_PATTERN: &str =
    "7F 23 03 D5 FF 43 00 D1 ?? ?? ?? ?? 08 01 80 52";

/// How far back the prologue walk goes before giving up.
const MAX_PROLOGUE_WALK: u64 = 2000;
/// How deep the global-reference scan looks into a function.
const MAX_GLOBAL_SCAN: u64 = 200;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaTargets {
    pub dock_spaces: Option<u64>,
    pub dppm: Option<u64>,
    pub add_space: Option<u64>,
    pub remove_space: Option<u64>,
    pub move_space: Option<u64>,
    pub set_front_window: Option<u64>,
    pub fix_animation: Option<u64>,
}

impl SaTargets {
    /// Rebases every discovered address by the loader slide.
    pub fn slid(self, slide: i64) -> SaTargets {
        let rebase = |va: Option<u64>| va.map(|v| v.wrapping_add(slide as u64));
        SaTargets {
            dock_spaces: rebase(self.dock_spaces),
            dppm: rebase(self.dppm),
            add_space: rebase(self.add_space),
            remove_space: rebase(self.remove_space),
            move_space: rebase(self.move_space),
            set_front_window: rebase(self.set_front_window),
            fix_animation: rebase(self.fix_animation),
        }
    }

    /// Which protocol capabilities the discovered set can back.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        if self.add_space.is_some() && self.dock_spaces.is_some() {
            caps.insert(Capabilities::SPACE_CREATE);
        }
        if self.remove_space.is_some() && self.dock_spaces.is_some() {
            caps.insert(Capabilities::SPACE_DESTROY);
        }
        if self.move_space.is_some() && self.dock_spaces.is_some() {
            caps.insert(Capabilities::SPACE_MOVE);
        }
        caps
    }
}

#[derive(Debug, Serialize)]
pub struct TargetReport {
    pub name: &'static str,
    pub found: bool,
    /// Hex address when found.
    pub address: Option<String>,
    pub method: &'static str,
    pub suggestion: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryReport {
    pub targets: Vec<TargetReport>,
}

impl DiscoveryReport {
    pub fn missing(&self) -> Vec<&'static str> {
        self.targets.iter().filter(|t| !t.found).map(|t| t.name).collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl std::fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for t in &self.targets {
            match (&t.address, t.suggestion) {
                (Some(addr), _) => writeln!(f, "{:18} {} via {}", t.name, addr, t.method)?,
                (None, Some(hint)) => writeln!(f, "{:18} MISSING ({}): {}", t.name, t.method, hint)?,
                (None, None) => writeln!(f, "{:18} MISSING ({})", t.name, t.method)?,
            }
        }
        Ok(())
    }
}

pub struct Discovery<'a> {
    image: &'a MachImage<'a>,
}

impl<'a> Discovery<'a> {
    pub fn new(image: &'a MachImage<'a>) -> Self {
        Discovery { image }
    }

    /// Runs all techniques and reports per-target status.
    pub fn discover(&self) -> (SaTargets, DiscoveryReport) {
        let add_space = self.function_by_selector(SEL_ADD_SPACE);
        let remove_space = self.function_by_selector(SEL_REMOVE_SPACE);
        let move_space = self.function_by_selector(SEL_MOVE_SPACE);
        let dock_spaces = self
            .function_by_selector(SEL_ACTIVE_SPACE_CHANGED)
            .and_then(|f| self.global_referenced_from(f));
        let dppm = self.double_dereferenced_global();
        let set_front_window = self.by_pattern(SET_FRONT_WINDOW_PATTERN);
        let fix_animation = self.by_pattern(FIX_ANIMATION_PATTERN);

        let targets = SaTargets {
            dock_spaces,
            dppm,
            add_space,
            remove_space,
            move_space,
            set_front_window,
            fix_animation,
        };

        let entries = [
            ("dock_spaces", dock_spaces, "selector-global", Some("the space-change handler no longer references the controller; re-derive from a sibling selector")),
            ("dppm", dppm, "adrp-ldr-ldr", Some("the display manager load is no longer a double dereference; refresh the signature")),
            ("add_space", add_space, "selector", Some("selector renamed; dump __objc_methname for candidates")),
            ("remove_space", remove_space, "selector", Some("selector renamed; dump __objc_methname for candidates")),
            ("move_space", move_space, "selector", Some("selector renamed; dump __objc_methname for candidates")),
            ("set_front_window", set_front_window, "pattern", Some("pattern rotted; re-tune against the current Dock build")),
            ("fix_animation", fix_animation, "pattern", Some("pattern rotted; re-tune against the current Dock build")),
        ];
        let report = DiscoveryReport {
            targets: entries
                .into_iter()
                .map(|(name, address, method, suggestion)| TargetReport {
                    name,
                    found: address.is_some(),
                    address: address.map(|a| format!("{a:#x}")),
                    method,
                    suggestion: if address.is_some() { None } else { suggestion },
                })
                .collect(),
        };
        (targets, report)
    }

    /// Technique 1: selector string → selref → text xref → prologue.
    pub fn function_by_selector(&self, selector: &str) -> Option<u64> {
        let selref = self.selref_of(selector)?;
        let load_site = self.selref_load_site(selref)?;
        let start = self.enclosing_prologue(load_site);
        debug!("{selector}: selref {selref:#x}, load at {load_site:#x}, start {start:?}");
        start
    }

    fn selref_of(&self, selector: &str) -> Option<u64> {
        let methname = self.image.section(SEG_TEXT, SECT_OBJC_METHNAME)?;
        let name_va = self.image.find_cstring(methname, selector)?;
        let selrefs = self.image.section(SEG_DATA, SECT_OBJC_SELREFS)?;
        let bytes = self.image.section_bytes(selrefs)?;
        bytes
            .chunks_exact(8)
            .position(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()) == name_va)
            .map(|i| selrefs.addr + (i * 8) as u64)
    }

    /// The address of the `ADRP` of the first `ADRP`+`LDR` pair that loads
    /// `selref_va`.
    fn selref_load_site(&self, selref_va: u64) -> Option<u64> {
        self.scan_text(|pc, window| {
            let (rd, page) = insn::decode_adrp(window[0], pc)?;
            let (_, rn, imm) = insn::decode_ldr_imm(window[1])?;
            (rn == rd && page + imm == selref_va).then_some(pc)
        })
    }

    /// Walks backward from `va` to the nearest recognizable prologue.
    fn enclosing_prologue(&self, va: u64) -> Option<u64> {
        let text = self.image.section(SEG_TEXT, SECT_TEXT)?;
        let mut pc = va;
        for _ in 0..MAX_PROLOGUE_WALK {
            if pc < text.addr {
                return None;
            }
            let word = self.image.read_u32_at_va(pc)?;
            if insn::is_prologue(word) {
                return Some(pc);
            }
            pc -= INSN_SIZE;
        }
        None
    }

    /// Technique 2: first `ADRP`+`ADD`/`LDR` pair within the function that
    /// forms an address in a data segment.
    pub fn global_referenced_from(&self, function_va: u64) -> Option<u64> {
        let text = self.image.section(SEG_TEXT, SECT_TEXT)?;
        let end = (text.addr + text.size).min(function_va + MAX_GLOBAL_SCAN * INSN_SIZE);
        let mut pc = function_va;
        while pc + INSN_SIZE < end {
            if let Some(word) = self.image.read_u32_at_va(pc)
                && let Some((rd, page)) = insn::decode_adrp(word, pc)
                && let Some(next) = self.image.read_u32_at_va(pc + INSN_SIZE)
            {
                let formed = match (insn::decode_add_imm(next), insn::decode_ldr_imm(next)) {
                    (Some((_, rn, imm)), _) if rn == rd => Some(page + imm),
                    (_, Some((_, rn, imm))) if rn == rd => Some(page + imm),
                    _ => None,
                };
                if let Some(target) = formed
                    && self.image.is_data_va(target)
                    && !self.is_selref_va(target)
                {
                    return Some(target);
                }
            }
            pc += INSN_SIZE;
        }
        None
    }

    /// Technique 3 for `dppm`: `ADRP`+`LDR`+`LDR` double dereference whose
    /// first load lands in data.
    pub fn double_dereferenced_global(&self) -> Option<u64> {
        self.scan_text_window3(|pc, window| {
            let (rd, page) = insn::decode_adrp(window[0], pc)?;
            let (rt1, rn1, imm) = insn::decode_ldr_imm(window[1])?;
            let (_, rn2, _) = insn::decode_ldr_imm(window[2])?;
            if rn1 != rd || rn2 != rt1 {
                return None;
            }
            let target = page + imm;
            self.image.is_data_va(target).then_some(target)
        })
    }

    /// Technique 3 proper: wildcarded byte scan over `__text`.
    pub fn by_pattern(&self, spec: &str) -> Option<u64> {
        let pattern = Pattern::compile(spec).ok()?;
        let text = self.image.section(SEG_TEXT, SECT_TEXT)?;
        let bytes = self.image.section_bytes(text)?;
        pattern.find(bytes).map(|offset| text.addr + offset as u64)
    }

    /// Selector references live in a data segment too; the global scans
    /// must not mistake them for object globals.
    fn is_selref_va(&self, va: u64) -> bool {
        self.image
            .section(SEG_DATA, SECT_OBJC_SELREFS)
            .is_some_and(|s| va >= s.addr && va < s.addr + s.size)
    }

    fn scan_text(&self, f: impl Fn(u64, [u32; 2]) -> Option<u64>) -> Option<u64> {
        let text = self.image.section(SEG_TEXT, SECT_TEXT)?;
        let bytes = self.image.section_bytes(text)?;
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        for i in 0..words.len().saturating_sub(1) {
            let pc = text.addr + (i as u64) * INSN_SIZE;
            if let Some(hit) = f(pc, [words[i], words[i + 1]]) {
                return Some(hit);
            }
        }
        None
    }

    fn scan_text_window3(&self, f: impl Fn(u64, [u32; 3]) -> Option<u64>) -> Option<u64> {
        let text = self.image.section(SEG_TEXT, SECT_TEXT)?;
        let bytes = self.image.section_bytes(text)?;
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        for i in 0..words.len().saturating_sub(2) {
            let pc = text.addr + (i as u64) * INSN_SIZE;
            if let Some(hit) = f(pc, [words[i], words[i + 1], words[i + 2]]) {
                return Some(hit);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sa::insn::{NOP, PACIBSP, RET, encode_adrp, encode_ldr_imm};
    use crate::sa::macho::testimage::ImageBuilder;

    /// Emits a plausible method body that loads `selref_va` and returns
    /// the VA of its first instruction. The walk-back stops at the first
    /// prologue-shaped word, so the body carries exactly one.
    fn emit_selector_method(builder: &mut ImageBuilder, selref_va: u64) -> u64 {
        let start = builder.push_insns(&[PACIBSP, NOP, NOP, NOP]);
        let adrp_pc = start + 4 * 4;
        builder.push_insns(&[
            encode_adrp(8, adrp_pc, selref_va),
            encode_ldr_imm(8, 8, selref_va & 0xFFF),
            NOP,
            RET,
        ]);
        start
    }

    #[test]
    fn selector_lookup_finds_the_enclosing_function() {
        let mut builder = ImageBuilder::new();
        builder.push_insns(&[NOP, RET]); // unrelated preamble
        let selref = builder.add_selector(SEL_ADD_SPACE);
        let start = emit_selector_method(&mut builder, selref);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let discovery = Discovery::new(&image);
        assert_eq!(discovery.function_by_selector(SEL_ADD_SPACE), Some(start));
        assert_eq!(discovery.function_by_selector("bogusSelector:"), None);
    }

    #[test]
    fn global_reference_scan_lands_in_data() {
        let mut builder = ImageBuilder::new();
        let selref = builder.add_selector(SEL_ACTIVE_SPACE_CHANGED);
        let global_va = builder.add_data_word(0);

        // handler: prologue, selref touch, then the controller load
        let start = builder.push_insns(&[PACIBSP]);
        let adrp_pc = start + 4;
        builder.push_insns(&[
            encode_adrp(8, adrp_pc, selref),
            encode_ldr_imm(8, 8, selref & 0xFFF),
        ]);
        let global_adrp_pc = start + 4 * 3;
        builder.push_insns(&[
            encode_adrp(9, global_adrp_pc, global_va),
            encode_ldr_imm(0, 9, global_va & 0xFFF),
            RET,
        ]);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let discovery = Discovery::new(&image);
        let function = discovery.function_by_selector(SEL_ACTIVE_SPACE_CHANGED).unwrap();
        assert_eq!(function, start);
        assert_eq!(discovery.global_referenced_from(function), Some(global_va));
    }

    #[test]
    fn double_dereference_signature_finds_dppm() {
        let mut builder = ImageBuilder::new();
        let global_va = builder.add_data_word(0);
        builder.push_insns(&[NOP, NOP]);
        let adrp_pc = builder.push_insns(&[]);
        builder.push_insns(&[
            encode_adrp(9, adrp_pc, global_va),
            encode_ldr_imm(9, 9, global_va & 0xFFF),
            encode_ldr_imm(0, 9, 0),
            RET,
        ]);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let discovery = Discovery::new(&image);
        assert_eq!(discovery.double_dereferenced_global(), Some(global_va));
    }

    #[test]
    fn pattern_fallback_finds_patched_functions() {
        let mut builder = ImageBuilder::new();
        builder.push_insns(&[NOP, NOP, RET]);
        // the pattern with wildcards filled arbitrarily
        let va = builder.push_text_bytes(&[
            0x7F, 0x23, 0x03, 0xD5, // pacibsp
            0xFD, 0x7B, 0xBF, 0xA9, // stp x29, x30, [sp, #-16]!
            0xFD, 0x03, 0x00, 0x91, // mov x29, sp
            0x11, 0x22, 0x33, 0x44, // (wildcarded)
            0x68, 0x00, 0x80, 0x52, // mov w8, #3
        ]);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let discovery = Discovery::new(&image);
        assert_eq!(discovery.by_pattern(SET_FRONT_WINDOW_PATTERN), Some(va));
        assert_eq!(discovery.by_pattern(FIX_ANIMATION_PATTERN), None);
    }

    #[test]
    fn full_discovery_reports_found_and_missing() {
        let mut builder = ImageBuilder::new();
        let add = builder.add_selector(SEL_ADD_SPACE);
        let remove = builder.add_selector(SEL_REMOVE_SPACE);
        let add_fn = emit_selector_method(&mut builder, add);
        let remove_fn = emit_selector_method(&mut builder, remove);

        let controller = builder.add_data_word(0);
        let sel = builder.add_selector(SEL_ACTIVE_SPACE_CHANGED);
        let handler = emit_selector_method(&mut builder, sel);
        let adrp_pc = builder.push_insns(&[]);
        builder.push_insns(&[
            encode_adrp(9, adrp_pc, controller),
            encode_ldr_imm(0, 9, controller & 0xFFF),
            RET,
        ]);
        let _ = handler;

        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();
        let (targets, report) = Discovery::new(&image).discover();

        assert_eq!(targets.add_space, Some(add_fn));
        assert_eq!(targets.remove_space, Some(remove_fn));
        assert_eq!(targets.move_space, None);
        assert_eq!(targets.dock_spaces, Some(controller));
        assert!(targets.set_front_window.is_none());

        let missing = report.missing();
        assert!(missing.contains(&"move_space"));
        assert!(missing.contains(&"set_front_window"));
        assert!(!missing.contains(&"add_space"));
        assert!(report.to_json().contains("add_space"));

        let caps = targets.capabilities();
        assert!(caps.contains(Capabilities::SPACE_CREATE));
        assert!(caps.contains(Capabilities::SPACE_DESTROY));
        assert!(!caps.contains(Capabilities::SPACE_MOVE));
    }
}
