//! Structured intermediate form for compiled units
//!
//! A host loader hands us a raw unit (see [`codec`]) which decodes into a
//! [`ClassUnit`]: a named type holding [`MethodUnit`]s, each with an optional
//! [`MethodBody`]. Bodies are a flat instruction list in which branch targets
//! are [`Label`]s placed with [`Instruction::Mark`], plus an exception-region
//! table and a line table that refer to the same labels.
//!
//! ```text
//!   Push(Str "USER1")         ; operand stack: [str]
//!   Store(1)                  ; locals[1] = str
//!   Mark(L0)                  ; label L0 = index 2
//!   Invoke shop.Repo.save     ; pops params, pushes return value (if any)
//!   ReturnValue
//!
//!   regions: [L0, L1) -> L2 catch *
//!   lines:   L0 -> 42
//! ```

pub mod codec;
pub mod verify;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Branch target inside one body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Constant operand of [`Instruction::Push`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i64),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Value kinds used in signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Str,
    Ref,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Int => "int",
            ValueKind::Str => "str",
            ValueKind::Ref => "ref",
        })
    }
}

/// Parameter and return kinds of a member, rendered as `(int, str) -> int`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueKind>,
    pub returns: Option<ValueKind>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValueKind>>, returns: Option<ValueKind>) -> Self {
        Self {
            params: params.into(),
            returns,
        }
    }

    /// `() -> void`
    pub fn void() -> Self {
        Self::default()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        match self.returns {
            Some(kind) => write!(f, ") -> {kind}"),
            None => f.write_str(") -> void"),
        }
    }
}

/// Target of an [`Instruction::Invoke`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub signature: Signature,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, signature: Signature) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            signature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Condition of [`Instruction::Branch`], tested against a popped int
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Zero,
    NonZero,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Places a label; not executed
    Mark(Label),
    Push(Constant),
    Load(u16),
    Store(u16),
    Dup,
    Pop,
    Binary(BinaryOp),
    Jump(Label),
    Branch { when: Condition, target: Label },
    Invoke(MethodRef),
    /// Pops a message string, pushes a failure value of the given kind
    NewFailure { kind: String },
    Return,
    ReturnValue,
    Throw,
}

impl Instruction {
    /// Operand-stack effect as (pops, pushes)
    pub fn stack_effect(&self) -> (u32, u32) {
        match self {
            Instruction::Mark(_) | Instruction::Jump(_) | Instruction::Return => (0, 0),
            Instruction::Push(_) | Instruction::Load(_) => (0, 1),
            Instruction::Store(_)
            | Instruction::Pop
            | Instruction::Branch { .. }
            | Instruction::ReturnValue
            | Instruction::Throw => (1, 0),
            Instruction::Dup => (1, 2),
            Instruction::Binary(_) => (2, 1),
            Instruction::NewFailure { .. } => (1, 1),
            Instruction::Invoke(target) => (
                u32::try_from(target.signature.params.len()).unwrap_or(u32::MAX),
                u32::from(target.signature.returns.is_some()),
            ),
        }
    }

    /// Normal-return instructions
    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Return | Instruction::ReturnValue)
    }

    /// Control never continues to the next instruction
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Instruction::Return | Instruction::ReturnValue | Instruction::Throw | Instruction::Jump(_)
        )
    }

    /// Labels this instruction may transfer control to
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Instruction::Jump(target) | Instruction::Branch { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Pseudo-instructions that never execute
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Instruction::Mark(_))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Mark(label) => write!(f, "{label}:"),
            Instruction::Push(c) => write!(f, "    push {c}"),
            Instruction::Load(slot) => write!(f, "    load {slot}"),
            Instruction::Store(slot) => write!(f, "    store {slot}"),
            Instruction::Dup => f.write_str("    dup"),
            Instruction::Pop => f.write_str("    pop"),
            Instruction::Binary(op) => write!(f, "    {}", format!("{op:?}").to_lowercase()),
            Instruction::Jump(target) => write!(f, "    jump {target}"),
            Instruction::Branch { when, target } => {
                let cond = match when {
                    Condition::Zero => "zero",
                    Condition::NonZero => "nonzero",
                };
                write!(f, "    branch.{cond} {target}")
            }
            Instruction::Invoke(m) => write!(f, "    invoke {}.{}{}", m.owner, m.name, m.signature),
            Instruction::NewFailure { kind } => write!(f, "    new_failure {kind}"),
            Instruction::Return => f.write_str("    return"),
            Instruction::ReturnValue => f.write_str("    return_value"),
            Instruction::Throw => f.write_str("    throw"),
        }
    }
}

/// Protected range `[start, end)` whose failures jump to `handler`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// Failure kind caught; `None` catches everything
    pub catch: Option<String>,
}

impl ExceptionRegion {
    pub fn catches(&self, kind: &str) -> bool {
        self.catch.as_deref().map_or(true, |c| c == kind)
    }
}

/// Source line that starts at `label`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMarker {
    pub line: u32,
    pub label: Label,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    pub regions: Vec<ExceptionRegion>,
    pub lines: Vec<LineMarker>,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl MethodBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: ExceptionRegion) -> Self {
        self.regions.push(region);
        self
    }

    pub fn with_line(mut self, line: u32, label: Label) -> Self {
        self.lines.push(LineMarker { line, label });
        self
    }

    /// Index of the instruction placing `label`
    pub fn label_index(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|insn| *insn == Instruction::Mark(label))
    }

    /// First label number not used anywhere in the body
    pub fn next_free_label(&self) -> Option<u32> {
        let from_code = self.instructions.iter().filter_map(|insn| match insn {
            Instruction::Mark(l) | Instruction::Jump(l) => Some(l.0),
            Instruction::Branch { target, .. } => Some(target.0),
            _ => None,
        });
        let from_regions = self
            .regions
            .iter()
            .flat_map(|r| [r.start.0, r.end.0, r.handler.0]);
        let from_lines = self.lines.iter().map(|l| l.label.0);

        match from_code.chain(from_regions).chain(from_lines).max() {
            Some(max) => max.checked_add(1),
            None => Some(0),
        }
    }

    /// Line of the first marker placed before the first executable instruction
    pub fn entry_line(&self) -> Option<u32> {
        let leading_labels: Vec<Label> = self
            .instructions
            .iter()
            .take_while(|insn| insn.is_pseudo())
            .filter_map(|insn| match insn {
                Instruction::Mark(l) => Some(*l),
                _ => None,
            })
            .collect();

        self.lines
            .iter()
            .find(|marker| leading_labels.contains(&marker.label))
            .map(|marker| marker.line)
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  max_stack={} max_locals={}", self.max_stack, self.max_locals)?;
        for insn in &self.instructions {
            writeln!(f, "  {insn}")?;
        }
        for r in &self.regions {
            writeln!(
                f,
                "  region [{}, {}) -> {} catch {}",
                r.start,
                r.end,
                r.handler,
                r.catch.as_deref().unwrap_or("*")
            )?;
        }
        for l in &self.lines {
            writeln!(f, "  line {} at {}", l.line, l.label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MethodKind {
    #[default]
    Regular,
    Constructor,
    StaticInitializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_native: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodUnit {
    pub name: String,
    pub kind: MethodKind,
    pub modifiers: Modifiers,
    pub signature: Signature,
    /// `None` for abstract and native members
    pub body: Option<MethodBody>,
}

impl MethodUnit {
    pub fn new(name: impl Into<String>, signature: Signature, body: MethodBody) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Regular,
            modifiers: Modifiers::default(),
            signature,
            body: Some(body),
        }
    }

    pub fn with_kind(mut self, kind: MethodKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassUnit {
    /// Namespace-qualified name, `.`-separated
    pub name: String,
    pub source_file: Option<String>,
    pub methods: Vec<MethodUnit>,
}

impl ClassUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: None,
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: MethodUnit) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method(&self, name: &str) -> Option<&MethodUnit> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl fmt::Display for ClassUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "type {}", self.name)?;
        for method in &self.methods {
            writeln!(f, "{}{} [{:?}]", method.name, method.signature, method.kind)?;
            match &method.body {
                Some(body) => write!(f, "{body}")?,
                None => writeln!(f, "  <no body>")?,
            }
        }
        Ok(())
    }
}
