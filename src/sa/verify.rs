//! Plausibility checks for discovered addresses.
//!
//! Static mode inspects the image: functions must sit 4-aligned in text
//! behind a recognizable prologue, globals must sit 8-aligned in data.
//! Runtime mode additionally reads the live process and checks pointer
//! alignment and a non-null isa word; it needs the task port, so when that
//! capability is missing the caller falls back to static mode.

use serde::Serialize;

use crate::sa::discovery::SaTargets;
use crate::sa::insn;
use crate::sa::macho::MachImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Ok,
    Missing,
    OutOfRange,
    Misaligned,
    NoPrologue,
    /// Runtime only: the live memory contradicts the image.
    LiveMismatch,
}

#[derive(Debug, Serialize)]
pub struct Verification {
    pub target: &'static str,
    pub verdict: Verdict,
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub mode: &'static str,
    pub results: Vec<Verification>,
}

impl VerifyReport {
    /// True when every *present* target checks out; missing targets only
    /// disable their own feature.
    pub fn all_present_ok(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.verdict, Verdict::Ok | Verdict::Missing))
    }
}

fn check_function(image: &MachImage<'_>, address: Option<u64>) -> Verdict {
    let Some(va) = address else {
        return Verdict::Missing;
    };
    if !image.is_text_va(va) {
        return Verdict::OutOfRange;
    }
    if va % 4 != 0 {
        return Verdict::Misaligned;
    }
    match image.read_u32_at_va(va) {
        Some(word) if insn::is_prologue(word) => Verdict::Ok,
        Some(_) => Verdict::NoPrologue,
        None => Verdict::OutOfRange,
    }
}

fn check_global(image: &MachImage<'_>, address: Option<u64>) -> Verdict {
    let Some(va) = address else {
        return Verdict::Missing;
    };
    if !image.is_data_va(va) {
        return Verdict::OutOfRange;
    }
    if va % 8 != 0 {
        return Verdict::Misaligned;
    }
    Verdict::Ok
}

/// Drops every target the verification rejected, leaving the rest to
/// serve. A bad address costs its feature, never the process.
pub fn prune(targets: SaTargets, report: &VerifyReport) -> SaTargets {
    let mut pruned = targets;
    for result in &report.results {
        if matches!(result.verdict, Verdict::Ok | Verdict::Missing) {
            continue;
        }
        match result.target {
            "dock_spaces" => pruned.dock_spaces = None,
            "dppm" => pruned.dppm = None,
            "add_space" => pruned.add_space = None,
            "remove_space" => pruned.remove_space = None,
            "move_space" => pruned.move_space = None,
            "set_front_window" => pruned.set_front_window = None,
            "fix_animation" => pruned.fix_animation = None,
            _ => {}
        }
    }
    pruned
}

/// Address plausibility against the image alone.
pub fn verify_static(image: &MachImage<'_>, targets: &SaTargets) -> VerifyReport {
    let results = vec![
        Verification { target: "dock_spaces", verdict: check_global(image, targets.dock_spaces) },
        Verification { target: "dppm", verdict: check_global(image, targets.dppm) },
        Verification { target: "add_space", verdict: check_function(image, targets.add_space) },
        Verification {
            target: "remove_space",
            verdict: check_function(image, targets.remove_space),
        },
        Verification { target: "move_space", verdict: check_function(image, targets.move_space) },
        Verification {
            target: "set_front_window",
            verdict: check_function(image, targets.set_front_window),
        },
        Verification {
            target: "fix_animation",
            verdict: check_function(image, targets.fix_animation),
        },
    ];
    VerifyReport { mode: "static", results }
}

/// Live verification against the injected process. Needs the task port;
/// callers that cannot get one use [`verify_static`] instead.
#[cfg(target_os = "macos")]
pub fn verify_runtime(
    image: &MachImage<'_>,
    targets: &SaTargets,
    pid: crate::sys::process::pid_t,
) -> crate::errors::Result<VerifyReport> {
    use crate::errors::InjectionError;
    use crate::sys::mach;

    let task = mach::task_for_pid_checked(pid).map_err(InjectionError::TaskPort)?;
    let guard = scopeguard::guard(task, |task| unsafe {
        mach::mach_port_deallocate(mach::mach_task_self(), task);
    });

    let mut results = Vec::new();
    for (name, address, global) in [
        ("dock_spaces", targets.dock_spaces, true),
        ("dppm", targets.dppm, true),
        ("add_space", targets.add_space, false),
        ("remove_space", targets.remove_space, false),
        ("move_space", targets.move_space, false),
        ("set_front_window", targets.set_front_window, false),
        ("fix_animation", targets.fix_animation, false),
    ] {
        let verdict = match address {
            None => Verdict::Missing,
            Some(va) => {
                let live = mach::read_remote_u64(*guard, va);
                match live {
                    None => Verdict::LiveMismatch,
                    Some(word) if global => {
                        // object pointer: aligned and carrying a non-null isa
                        if word == 0 || word % 8 != 0 {
                            Verdict::LiveMismatch
                        } else if mach::read_remote_u64(*guard, word & 0x7FFF_FFFF_FFF8)
                            .is_some_and(|isa| isa != 0)
                        {
                            Verdict::Ok
                        } else {
                            Verdict::LiveMismatch
                        }
                    }
                    Some(word) => {
                        // patch site: the image and the live text must agree
                        let expected = image.read_u32_at_va(va);
                        if expected == Some((word & 0xFFFF_FFFF) as u32) {
                            Verdict::Ok
                        } else {
                            Verdict::LiveMismatch
                        }
                    }
                }
            }
        };
        results.push(Verification { target: name, verdict });
    }
    Ok(VerifyReport { mode: "runtime", results })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sa::insn::{NOP, PACIBSP, RET};
    use crate::sa::macho::testimage::ImageBuilder;

    #[test]
    fn static_verification_accepts_well_formed_targets() {
        let mut builder = ImageBuilder::new();
        let function = builder.push_insns(&[PACIBSP, NOP, RET]);
        let global = builder.add_data_word(0);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let targets = SaTargets {
            dock_spaces: Some(global),
            add_space: Some(function),
            ..Default::default()
        };
        let report = verify_static(&image, &targets);
        assert!(report.all_present_ok());
        assert_eq!(report.mode, "static");
    }

    #[test]
    fn function_without_prologue_is_flagged() {
        let mut builder = ImageBuilder::new();
        let function = builder.push_insns(&[NOP, NOP, RET]);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let targets = SaTargets { add_space: Some(function), ..Default::default() };
        let report = verify_static(&image, &targets);
        assert!(!report.all_present_ok());
        let add = report.results.iter().find(|r| r.target == "add_space").unwrap();
        assert_eq!(add.verdict, Verdict::NoPrologue);
    }

    #[test]
    fn swapped_ranges_are_flagged() {
        let mut builder = ImageBuilder::new();
        let function = builder.push_insns(&[PACIBSP, RET]);
        let global = builder.add_data_word(0);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        // a "global" pointing into text and a "function" pointing into data
        let targets = SaTargets {
            dock_spaces: Some(function),
            add_space: Some(global),
            ..Default::default()
        };
        let report = verify_static(&image, &targets);
        for r in &report.results {
            match r.target {
                "dock_spaces" | "add_space" => assert_eq!(r.verdict, Verdict::OutOfRange),
                _ => assert_eq!(r.verdict, Verdict::Missing),
            }
        }
    }

    #[test]
    fn prune_drops_only_rejected_targets() {
        let mut builder = ImageBuilder::new();
        let function = builder.push_insns(&[PACIBSP, RET]);
        let global = builder.add_data_word(0);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let targets = SaTargets {
            dock_spaces: Some(global),
            add_space: Some(function),
            remove_space: Some(global), // data address passed off as code
            ..Default::default()
        };
        let report = verify_static(&image, &targets);
        let pruned = prune(targets, &report);
        assert_eq!(pruned.dock_spaces, Some(global));
        assert_eq!(pruned.add_space, Some(function));
        assert_eq!(pruned.remove_space, None);
    }

    #[test]
    fn misalignment_is_flagged() {
        let mut builder = ImageBuilder::new();
        builder.push_insns(&[PACIBSP, RET]);
        let global = builder.add_data_word(0);
        let bytes = builder.build();
        let image = MachImage::parse(&bytes).unwrap();

        let targets = SaTargets { dppm: Some(global + 4), ..Default::default() };
        let report = verify_static(&image, &targets);
        let dppm = report.results.iter().find(|r| r.target == "dppm").unwrap();
        assert_eq!(dppm.verdict, Verdict::Misaligned);
    }
}
