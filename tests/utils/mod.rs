// Integration test utilities
//
// A tiny interpreter for the unit IR, so instrumented bodies can actually be
// executed: hook calls on `rastreo.Recorder` are routed to a ThreadRecorder,
// `test.Clock.advanceMs` moves a ManualClock, everything else dispatches to
// loaded classes.

#![allow(dead_code)]

use rastreo::artifacts::{ArtifactError, ArtifactSink};
use rastreo::clock::ManualClock;
use rastreo::event::Failure;
use rastreo::recorder::{CallSite, ThreadRecorder};
use rastreo::trace_tree::TraceTree;
use rastreo::transform::{Instrumenter, RECORDER_OWNER};
use rastreo::unit::{
    codec, BinaryOp, ClassUnit, Condition, Constant, ExceptionRegion, Instruction, Label,
    MethodBody, MethodRef, MethodUnit, Signature, ValueKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const CLOCK_OWNER: &str = "test.Clock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
    Failure(Thrown),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    pub kind: String,
    pub message: String,
}

impl Thrown {
    pub fn new(kind: &str, message: &str) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

enum Flow {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

pub struct Machine {
    classes: HashMap<String, ClassUnit>,
    recorder: Option<ThreadRecorder>,
    clock: Option<Arc<ManualClock>>,
    pub hook_calls: usize,
}

impl Machine {
    pub fn new(classes: impl IntoIterator<Item = ClassUnit>) -> Self {
        Self {
            classes: classes.into_iter().map(|c| (c.name.clone(), c)).collect(),
            recorder: None,
            clock: None,
            hook_calls: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: ThreadRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn recorder(&self) -> &ThreadRecorder {
        self.recorder.as_ref().expect("machine has no recorder")
    }

    pub fn call(&mut self, owner: &str, name: &str, args: Vec<Value>) -> Result<Option<Value>, Thrown> {
        let method = self
            .classes
            .get(owner)
            .and_then(|c| c.method(name))
            .cloned()
            .unwrap_or_else(|| panic!("no such member {owner}.{name}"));
        let body = method
            .body
            .unwrap_or_else(|| panic!("{owner}.{name} has no body"));
        self.execute(&body, args)
    }

    fn execute(&mut self, body: &MethodBody, args: Vec<Value>) -> Result<Option<Value>, Thrown> {
        let labels: HashMap<Label, usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(at, insn)| match insn {
                Instruction::Mark(l) => Some((*l, at)),
                _ => None,
            })
            .collect();
        let mut locals = args;
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;

        loop {
            let insn = body
                .instructions
                .get(pc)
                .unwrap_or_else(|| panic!("fell off the end of the body at {pc}"));
            match self.step(insn, &mut stack, &mut locals) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(label)) => pc = labels[&label],
                Ok(Flow::Return(value)) => return Ok(value),
                Err(thrown) => {
                    let handler = body.regions.iter().find(|r| covers(r, pc, &labels) && r.catches(&thrown.kind));
                    match handler {
                        Some(region) => {
                            stack.clear();
                            stack.push(Value::Failure(thrown));
                            pc = labels[&region.handler];
                        }
                        None => return Err(thrown),
                    }
                }
            }
        }
    }

    fn step(&mut self, insn: &Instruction, stack: &mut Vec<Value>, locals: &mut Vec<Value>) -> Result<Flow, Thrown> {
        match insn {
            Instruction::Mark(_) => {}
            Instruction::Push(c) => stack.push(match c {
                Constant::Null => Value::Null,
                Constant::Int(v) => Value::Int(*v),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            Instruction::Load(slot) => stack.push(locals.get(*slot as usize).cloned().unwrap_or(Value::Null)),
            Instruction::Store(slot) => {
                let value = pop(stack);
                let slot = *slot as usize;
                if locals.len() <= slot {
                    locals.resize(slot + 1, Value::Null);
                }
                locals[slot] = value;
            }
            Instruction::Dup => {
                let top = stack.last().cloned().expect("dup on empty stack");
                stack.push(top);
            }
            Instruction::Pop => {
                pop(stack);
            }
            Instruction::Binary(op) => {
                let b = int(pop(stack));
                let a = int(pop(stack));
                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                        return Err(Thrown::new("ArithmeticError", "division by zero"))
                    }
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                };
                stack.push(Value::Int(value));
            }
            Instruction::Jump(target) => return Ok(Flow::Jump(*target)),
            Instruction::Branch { when, target } => {
                let v = int(pop(stack));
                let taken = match when {
                    Condition::Zero => v == 0,
                    Condition::NonZero => v != 0,
                };
                if taken {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::Invoke(target) => {
                let at = stack.len() - target.signature.params.len();
                let args = stack.split_off(at);
                if let Some(value) = self.invoke(target, args)? {
                    stack.push(value);
                }
            }
            Instruction::NewFailure { kind } => {
                let Value::Str(message) = pop(stack) else {
                    panic!("failure message must be a string");
                };
                stack.push(Value::Failure(Thrown {
                    kind: kind.clone(),
                    message,
                }));
            }
            Instruction::Return => return Ok(Flow::Return(None)),
            Instruction::ReturnValue => return Ok(Flow::Return(Some(pop(stack)))),
            Instruction::Throw => match pop(stack) {
                Value::Failure(thrown) => return Err(thrown),
                other => panic!("throw of non-failure {other:?}"),
            },
        }
        Ok(Flow::Next)
    }

    fn invoke(&mut self, target: &MethodRef, mut args: Vec<Value>) -> Result<Option<Value>, Thrown> {
        if target.owner == RECORDER_OWNER {
            self.hook_calls += 1;
            let recorder = self.recorder.as_mut().expect("hook called without a recorder");
            match target.name.as_str() {
                "enter" => {
                    let line = int(args.pop().unwrap());
                    let [type_name, member, signature] = [args.remove(0), args.remove(0), args.remove(0)].map(string);
                    recorder.enter(&CallSite::new(&type_name, &member).signature(&signature).line(line));
                }
                "exit" => {
                    let failure = match args.pop().unwrap() {
                        Value::Failure(t) => Some(Failure::new(t.kind, t.message)),
                        _ => None,
                    };
                    recorder.exit(failure);
                }
                other => panic!("unknown hook {other}"),
            }
            return Ok(None);
        }
        if target.owner == CLOCK_OWNER {
            let ms = int(args.pop().unwrap());
            if let Some(clock) = &self.clock {
                clock.advance_ms(ms as u64);
            }
            return Ok(None);
        }
        self.call(&target.owner, &target.name, args)
    }
}

fn covers(region: &ExceptionRegion, pc: usize, labels: &HashMap<Label, usize>) -> bool {
    labels[&region.start] <= pc && pc < labels[&region.end]
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn int(value: Value) -> i64 {
    match value {
        Value::Int(v) => v,
        other => panic!("expected int, got {other:?}"),
    }
}

fn string(value: Value) -> String {
    match value {
        Value::Str(s) => s,
        other => panic!("expected str, got {other:?}"),
    }
}

/// Run every class through the raw-unit boundary and decode the result
pub fn instrument_all(instrumenter: &Instrumenter, classes: &[ClassUnit]) -> Vec<ClassUnit> {
    classes
        .iter()
        .map(|class| {
            let raw = codec::encode(class).unwrap();
            let (out, _) = instrumenter.transform_raw(&class.name, &raw);
            codec::decode(&out).unwrap()
        })
        .collect()
}

pub fn invoke(owner: &str, name: &str, signature: Signature) -> Instruction {
    Instruction::Invoke(MethodRef::new(owner, name, signature))
}

fn int_fn(params: usize) -> Signature {
    Signature::new(vec![ValueKind::Int; params], Some(ValueKind::Int))
}

/// shop.A.foo() -> shop.B.bar() -> shop.C.baz() (5ms leaf); foo returns 42
pub fn chain_classes() -> Vec<ClassUnit> {
    let a = ClassUnit::new("shop.A").with_method(MethodUnit::new(
        "foo",
        int_fn(0),
        MethodBody::new(vec![
            Instruction::Mark(Label(0)),
            invoke("shop.B", "bar", int_fn(0)),
            Instruction::ReturnValue,
        ])
        .with_line(10, Label(0)),
    ));
    let b = ClassUnit::new("shop.B").with_method(MethodUnit::new(
        "bar",
        int_fn(0),
        MethodBody::new(vec![
            invoke("shop.C", "baz", int_fn(0)),
            Instruction::Push(Constant::Int(1)),
            Instruction::Binary(BinaryOp::Add),
            Instruction::ReturnValue,
        ]),
    ));
    let c = ClassUnit::new("shop.C").with_method(MethodUnit::new(
        "baz",
        int_fn(0),
        MethodBody::new(vec![
            Instruction::Push(Constant::Int(5)),
            invoke(CLOCK_OWNER, "advanceMs", Signature::new([ValueKind::Int], None)),
            Instruction::Push(Constant::Int(41)),
            Instruction::ReturnValue,
        ]),
    ));
    vec![a, b, c]
}

/// shop.Checkout.checkout(n) -> shop.Inventory.reserve(n); reserve(0) fails
/// with shop.StockError
pub fn checkout_classes() -> Vec<ClassUnit> {
    let inventory = ClassUnit::new("shop.Inventory").with_method(MethodUnit::new(
        "reserve",
        int_fn(1),
        MethodBody::new(vec![
            Instruction::Load(0),
            Instruction::Branch {
                when: Condition::Zero,
                target: Label(0),
            },
            Instruction::Load(0),
            Instruction::ReturnValue,
            Instruction::Mark(Label(0)),
            Instruction::Push(Constant::Str("out of stock".into())),
            Instruction::NewFailure {
                kind: "shop.StockError".into(),
            },
            Instruction::Throw,
        ]),
    ));
    let checkout = ClassUnit::new("shop.Checkout").with_method(MethodUnit::new(
        "checkout",
        int_fn(1),
        MethodBody::new(vec![
            Instruction::Load(0),
            invoke("shop.Inventory", "reserve", int_fn(1)),
            Instruction::Push(Constant::Int(100)),
            Instruction::Binary(BinaryOp::Mul),
            Instruction::ReturnValue,
        ]),
    ));
    vec![checkout, inventory]
}

/// shop.Calc.safeDiv(a, b): catches its own ArithmeticError and returns -1
pub fn calc_class() -> ClassUnit {
    ClassUnit::new("shop.Calc").with_method(MethodUnit::new(
        "safeDiv",
        int_fn(2),
        MethodBody::new(vec![
            Instruction::Mark(Label(0)),
            Instruction::Load(0),
            Instruction::Load(1),
            Instruction::Binary(BinaryOp::Div),
            Instruction::ReturnValue,
            Instruction::Mark(Label(1)),
            Instruction::Mark(Label(2)),
            Instruction::Pop,
            Instruction::Push(Constant::Int(-1)),
            Instruction::ReturnValue,
        ])
        .with_region(ExceptionRegion {
            start: Label(0),
            end: Label(1),
            handler: Label(2),
            catch: Some("ArithmeticError".into()),
        }),
    ))
}

/// shop.Rec.down(n): recurses to zero, returns 0
pub fn recursive_class() -> ClassUnit {
    ClassUnit::new("shop.Rec").with_method(MethodUnit::new(
        "down",
        int_fn(1),
        MethodBody::new(vec![
            Instruction::Load(0),
            Instruction::Branch {
                when: Condition::Zero,
                target: Label(0),
            },
            Instruction::Load(0),
            Instruction::Push(Constant::Int(1)),
            Instruction::Binary(BinaryOp::Sub),
            invoke("shop.Rec", "down", int_fn(1)),
            Instruction::ReturnValue,
            Instruction::Mark(Label(0)),
            Instruction::Push(Constant::Int(0)),
            Instruction::ReturnValue,
        ]),
    ))
}

/// Sink that keeps every submitted tree
#[derive(Default)]
pub struct CollectingSink {
    trees: Mutex<Vec<TraceTree>>,
}

impl CollectingSink {
    pub fn take(&self) -> Vec<TraceTree> {
        std::mem::take(&mut *self.trees.lock().unwrap())
    }
}

impl ArtifactSink for CollectingSink {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        self.trees.lock().unwrap().push(tree);
        Ok(())
    }
}

/// Sink that rejects trees rooted in types with the given prefix
pub struct RejectingSink<S> {
    pub prefix: String,
    pub inner: S,
}

impl<S: ArtifactSink> ArtifactSink for RejectingSink<S> {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        if tree.root_type.starts_with(&self.prefix) {
            return Err(ArtifactError::Io {
                path: tree.trace_id.to_string().into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.submit(tree)
    }
}
