//! Harness shared by the end-to-end scenario and property tests under
//! `tests/`: build one or more in-memory packages through the full
//! `vmx-build` pipeline, load the resulting image into a [`Machine`],
//! run it to completion, and recover whatever it wrote to its console.
//!
//! Grounded on `vmx-lang`'s own `runtime::tests::run_print` (the
//! `SharedOutput` `Write` sink pattern) generalized to run through the
//! build driver rather than hand-assembling a `main` directly.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use thiserror::Error;

use vmx_build::{build_pkgs, Flags, Options};
use vmx_machine::core::ExceptionKind;
use vmx_machine::{Config, Machine};

pub const RUN_TICK_BUDGET: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("build produced diagnostics: {0}")]
    Diagnostics(String),
    #[error("package {0:?} did not produce a linked image")]
    NoArtifact(String),
    #[error(transparent)]
    Image(#[from] vmx_image::ImageError),
    #[error("image has no code section")]
    NoEntryPoint,
    #[error("program raised {0}")]
    Exception(String),
    #[error("program did not halt within {RUN_TICK_BUDGET} ticks")]
    DidNotHalt,
}

/// A `Write` sink cloned into a [`Config`] and kept outside it, so the
/// bytes a running machine wrote to its console can be read back
/// afterward.
#[derive(Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl io::Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedOutput {
    pub fn take_string(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

/// Builds `pkg` (and its transitive imports) against `home`, links its
/// `main`, and runs the linked image to a clean halt, returning
/// whatever it printed. Any diagnostic, link failure or abnormal
/// exception is reported rather than panicking, so scenario tests can
/// assert on the failure shape directly.
pub fn build_and_run_main(home: &dyn vmx_build::Home, pkg: &str) -> Result<String, HarnessError> {
    let opts = Options {
        home,
        std_root: None,
        flags: Flags { static_only: false, verbose: false, run_tests: false },
    };
    let report = build_pkgs(&opts, &[pkg.to_string()]);
    if !report.diagnostics.is_empty() {
        return Err(HarnessError::Diagnostics(diag_summary(&report.diagnostics)));
    }
    let bytes = report.artifacts.get(pkg).ok_or_else(|| HarnessError::NoArtifact(pkg.to_string()))?;
    run_image(bytes)
}

fn run_image(bytes: &[u8]) -> Result<String, HarnessError> {
    let sections = vmx_image::read(bytes)?;
    let entry = vmx_image::code_start(&sections).ok_or(HarnessError::NoEntryPoint)?;

    let out = SharedOutput::default();
    let config = Config {
        output: Box::new(out.clone()),
        init_pc: entry,
        ..Default::default()
    };
    let mut machine = Machine::new(config);
    for section in &sections {
        if !section.bytes.is_empty() {
            machine
                .write_bytes(section.addr, &section.bytes)
                .expect("scenario images stay within the default machine's memory size");
        }
    }
    machine.set_pc(entry);

    let (_ticks, exc) = machine.run(RUN_TICK_BUDGET);
    match exc {
        Some(e) if e.kind == ExceptionKind::Halt => Ok(out.take_string()),
        Some(e) => Err(HarnessError::Exception(e.to_string())),
        None => Err(HarnessError::DidNotHalt),
    }
}

/// Runs `pkg` expecting the build to fail, returning the joined
/// diagnostic messages (scenario tests assert on their content rather
/// than on exact positions, which aren't part of the observable
/// contract).
pub fn build_expecting_diagnostics(home: &dyn vmx_build::Home, pkg: &str) -> String {
    let opts = Options {
        home,
        std_root: None,
        flags: Flags::default(),
    };
    let report = build_pkgs(&opts, &[pkg.to_string()]);
    assert!(!report.diagnostics.is_empty(), "expected package {pkg:?} to fail to build");
    assert!(report.artifacts.get(pkg).is_none(), "a failed build must not produce an image");
    diag_summary(&report.diagnostics)
}

fn diag_summary(diags: &vmx_syms::Diagnostics) -> String {
    diags.as_slice().iter().map(|d| d.message.clone()).collect::<Vec<_>>().join("; ")
}
