//! Entry/exit hook insertion
//!
//! Rewrites a member body so that it:
//!
//! 1. calls `rastreo.Recorder.enter(type, member, signature, line)` first,
//! 2. calls `rastreo.Recorder.exit(null)` right before every normal return,
//! 3. runs the whole original body inside one outer catch-all region whose
//!    handler calls `rastreo.Recorder.exit(failure)` and rethrows the failure.
//!
//! ```text
//!   push "shop.OrderService"        ┐
//!   push "placeOrder"               │ entry hook
//!   push "(str, int) -> int"        │
//!   push 42                         │
//!   invoke rastreo.Recorder.enter   ┘
//! Ls:                               ┐
//!   ... original body ...           │ outer region [Ls, Le) -> Lh
//!   push null                       │ (before each return)
//!   invoke rastreo.Recorder.exit    │
//!   return_value                    ┘
//! Le:
//! Lh:
//!   dup
//!   invoke rastreo.Recorder.exit
//!   throw
//! ```
//!
//! The outer region is appended after the body's own regions so those
//! handlers keep priority. Every rewritten body is re-verified and its
//! `max_stack`/`max_locals` recomputed. A unit that cannot be rewritten keeps
//! its original body; one failing member never affects another.

use crate::config::TracerConfig;
use crate::filter::NameFilter;
use crate::unit::codec::{self, CodecError};
use crate::unit::verify::{analyze, VerifyError};
use crate::unit::{
    ClassUnit, Constant, ExceptionRegion, Instruction, Label, MethodBody, MethodKind, MethodRef,
    MethodUnit, Signature, ValueKind,
};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Owner of the hook members invoked by rewritten bodies
pub const RECORDER_OWNER: &str = "rastreo.Recorder";

/// `rastreo.Recorder.enter(str, str, str, int) -> void`
pub fn enter_hook() -> MethodRef {
    MethodRef::new(
        RECORDER_OWNER,
        "enter",
        Signature::new(
            [ValueKind::Str, ValueKind::Str, ValueKind::Str, ValueKind::Int],
            None,
        ),
    )
}

/// `rastreo.Recorder.exit(ref) -> void`
pub fn exit_hook() -> MethodRef {
    MethodRef::new(RECORDER_OWNER, "exit", Signature::new([ValueKind::Ref], None))
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("original body failed verification: {0}")]
    InvalidInput(VerifyError),

    #[error("rewritten body failed verification: {0}")]
    InvalidOutput(VerifyError),

    #[error("no free labels left in body")]
    LabelSpaceExhausted,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Why a member was passed through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Constructor,
    StaticInitializer,
    Abstract,
    Native,
    NoBody,
    AlreadyInstrumented,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Constructor => "constructor",
            SkipReason::StaticInitializer => "static initializer",
            SkipReason::Abstract => "abstract",
            SkipReason::Native => "native",
            SkipReason::NoBody => "no body",
            SkipReason::AlreadyInstrumented => "already instrumented",
        })
    }
}

/// Output buffer handed to a [`MethodVisitor`]
#[derive(Debug, Default)]
pub struct BodyWriter {
    instructions: Vec<Instruction>,
    regions: Vec<ExceptionRegion>,
}

impl BodyWriter {
    pub fn emit(&mut self, insn: Instruction) {
        self.instructions.push(insn);
    }

    /// Append a region after every region already present
    pub fn add_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }
}

/// Visitor driven over one body by [`rewrite`]
///
/// The default methods copy the body unchanged.
pub trait MethodVisitor {
    fn visit_start(&mut self, _out: &mut BodyWriter) {}

    fn visit_instruction(&mut self, insn: &Instruction, out: &mut BodyWriter) {
        out.emit(insn.clone());
    }

    fn visit_end(&mut self, _out: &mut BodyWriter) {}
}

/// Drive `visitor` over `body`, then verify the result and recompute its maxima
pub fn rewrite<V: MethodVisitor>(
    body: &MethodBody,
    signature: &Signature,
    visitor: &mut V,
) -> Result<MethodBody, TransformError> {
    analyze(body, signature).map_err(TransformError::InvalidInput)?;

    let mut out = BodyWriter {
        instructions: Vec::with_capacity(body.instructions.len() + 16),
        regions: body.regions.clone(),
    };
    visitor.visit_start(&mut out);
    for insn in &body.instructions {
        visitor.visit_instruction(insn, &mut out);
    }
    visitor.visit_end(&mut out);

    let mut rewritten = MethodBody {
        instructions: out.instructions,
        regions: out.regions,
        lines: body.lines.clone(),
        max_stack: 0,
        max_locals: 0,
    };
    let analysis = analyze(&rewritten, signature).map_err(TransformError::InvalidOutput)?;
    rewritten.max_stack = analysis.max_stack;
    rewritten.max_locals = analysis.max_locals.max(body.max_locals);
    Ok(rewritten)
}

/// Visitor inserting the recorder's entry, exit and failure hooks
#[derive(Debug)]
pub struct EntryExitHooks {
    type_name: String,
    member: String,
    signature: String,
    line: i64,
    start: Label,
    end: Label,
    handler: Label,
}

impl EntryExitHooks {
    pub fn new(type_name: &str, method: &MethodUnit, body: &MethodBody) -> Result<Self, TransformError> {
        let first = body
            .next_free_label()
            .ok_or(TransformError::LabelSpaceExhausted)?;
        let label = |offset: u32| {
            first
                .checked_add(offset)
                .map(Label)
                .ok_or(TransformError::LabelSpaceExhausted)
        };

        Ok(Self {
            type_name: type_name.to_string(),
            member: method.name.clone(),
            signature: method.signature.to_string(),
            line: body.entry_line().map_or(-1, i64::from),
            start: label(0)?,
            end: label(1)?,
            handler: label(2)?,
        })
    }

    fn emit_exit(out: &mut BodyWriter) {
        out.emit(Instruction::Invoke(exit_hook()));
    }
}

impl MethodVisitor for EntryExitHooks {
    fn visit_start(&mut self, out: &mut BodyWriter) {
        out.emit(Instruction::Push(Constant::Str(self.type_name.clone())));
        out.emit(Instruction::Push(Constant::Str(self.member.clone())));
        out.emit(Instruction::Push(Constant::Str(self.signature.clone())));
        out.emit(Instruction::Push(Constant::Int(self.line)));
        out.emit(Instruction::Invoke(enter_hook()));
        out.emit(Instruction::Mark(self.start));
    }

    fn visit_instruction(&mut self, insn: &Instruction, out: &mut BodyWriter) {
        if insn.is_return() {
            out.emit(Instruction::Push(Constant::Null));
            Self::emit_exit(out);
        }
        out.emit(insn.clone());
    }

    fn visit_end(&mut self, out: &mut BodyWriter) {
        out.emit(Instruction::Mark(self.end));
        out.emit(Instruction::Mark(self.handler));
        out.emit(Instruction::Dup);
        Self::emit_exit(out);
        out.emit(Instruction::Throw);
        out.add_region(ExceptionRegion {
            start: self.start,
            end: self.end,
            handler: self.handler,
            catch: None,
        });
    }
}

/// Result of instrumenting one member
#[derive(Debug)]
pub enum MethodOutcome {
    Instrumented(MethodBody),
    Skipped(SkipReason),
    Failed(TransformError),
}

/// Members that are always passed through
pub fn skip_reason(method: &MethodUnit) -> Option<SkipReason> {
    match method.kind {
        MethodKind::Constructor => return Some(SkipReason::Constructor),
        MethodKind::StaticInitializer => return Some(SkipReason::StaticInitializer),
        MethodKind::Regular => {}
    }
    if method.modifiers.is_abstract {
        return Some(SkipReason::Abstract);
    }
    if method.modifiers.is_native {
        return Some(SkipReason::Native);
    }
    match &method.body {
        None => Some(SkipReason::NoBody),
        Some(body) if is_instrumented(body) => Some(SkipReason::AlreadyInstrumented),
        Some(_) => None,
    }
}

/// Whether the body already opens with the entry hook
pub fn is_instrumented(body: &MethodBody) -> bool {
    body.instructions
        .iter()
        .filter(|insn| !insn.is_pseudo())
        .take(5)
        .any(|insn| matches!(insn, Instruction::Invoke(m) if m.owner == RECORDER_OWNER && m.name == "enter"))
}

/// Instrument one member of `type_name`
pub fn instrument_method(type_name: &str, method: &MethodUnit) -> MethodOutcome {
    if let Some(reason) = skip_reason(method) {
        return MethodOutcome::Skipped(reason);
    }
    let Some(body) = &method.body else {
        return MethodOutcome::Skipped(SkipReason::NoBody);
    };

    let result = EntryExitHooks::new(type_name, method, body)
        .and_then(|mut hooks| rewrite(body, &method.signature, &mut hooks));
    match result {
        Ok(rewritten) => MethodOutcome::Instrumented(rewritten),
        Err(e) => MethodOutcome::Failed(e),
    }
}

/// Per-type summary of what the instrumenter did
#[derive(Debug, Default)]
pub struct TransformReport {
    pub type_name: String,
    /// The type was rejected by the name filter
    pub filtered_out: bool,
    pub instrumented: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, TransformError)>,
}

impl TransformReport {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..Self::default()
        }
    }

    /// Nothing in the unit changed
    pub fn is_noop(&self) -> bool {
        self.instrumented.is_empty()
    }
}

impl fmt::Display for TransformReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filtered_out {
            return writeln!(f, "{}: excluded by filter", self.type_name);
        }
        writeln!(
            f,
            "{}: {} instrumented, {} skipped, {} failed",
            self.type_name,
            self.instrumented.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        for name in &self.instrumented {
            writeln!(f, "  + {name}")?;
        }
        for (name, reason) in &self.skipped {
            writeln!(f, "  - {name} ({reason})")?;
        }
        for (name, error) in &self.failed {
            writeln!(f, "  ! {name}: {error}")?;
        }
        Ok(())
    }
}

/// Host-loader boundary: accept a raw unit, return it rewritten or untouched
pub trait UnitTransformer: Send + Sync {
    fn transform<'a>(&self, type_name: &str, raw: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Filter-gated instrumenter over raw units
#[derive(Debug, Clone)]
pub struct Instrumenter {
    filter: NameFilter,
}

impl Instrumenter {
    pub fn new(filter: NameFilter) -> Self {
        Self { filter }
    }

    pub fn from_config(config: &TracerConfig) -> Self {
        Self::new(config.filter())
    }

    /// Instrument every eligible member; failed members keep their original body
    pub fn instrument_class(&self, class: &ClassUnit) -> (ClassUnit, TransformReport) {
        let mut report = TransformReport::new(&class.name);
        let mut out = class.clone();

        for method in &mut out.methods {
            match instrument_method(&class.name, method) {
                MethodOutcome::Instrumented(body) => {
                    method.body = Some(body);
                    report.instrumented.push(method.name.clone());
                }
                MethodOutcome::Skipped(reason) => report.skipped.push((method.name.clone(), reason)),
                MethodOutcome::Failed(error) => {
                    tracing::warn!(
                        type_name = %class.name,
                        member = %method.name,
                        %error,
                        "transform failed, keeping original body"
                    );
                    report.failed.push((method.name.clone(), error));
                }
            }
        }

        (out, report)
    }

    /// Transform a raw unit, returning the input bytes untouched unless something changed
    pub fn transform_raw<'a>(&self, type_name: &str, raw: &'a [u8]) -> (Cow<'a, [u8]>, TransformReport) {
        let type_name = type_name.replace('/', ".");
        let mut report = TransformReport::new(&type_name);

        if !self.filter.should_trace(&type_name) {
            report.filtered_out = true;
            return (Cow::Borrowed(raw), report);
        }

        let class = match codec::decode(raw) {
            Ok(class) => class,
            Err(e) => {
                tracing::warn!(%type_name, error = %e, "cannot decode unit, passing through");
                report.failed.push((type_name.clone(), e.into()));
                return (Cow::Borrowed(raw), report);
            }
        };

        tracing::debug!(%type_name, methods = class.methods.len(), "instrumenting type");
        let (instrumented, report) = self.instrument_class(&class);
        if report.is_noop() {
            return (Cow::Borrowed(raw), report);
        }

        match codec::encode(&instrumented) {
            Ok(bytes) => (Cow::Owned(bytes), report),
            Err(e) => {
                tracing::warn!(%type_name, error = %e, "cannot encode unit, passing through");
                let mut report = report;
                report.instrumented.clear();
                report.failed.push((type_name, e.into()));
                (Cow::Borrowed(raw), report)
            }
        }
    }
}

impl UnitTransformer for Instrumenter {
    fn transform<'a>(&self, type_name: &str, raw: &'a [u8]) -> Cow<'a, [u8]> {
        self.transform_raw(type_name, raw).0
    }
}
