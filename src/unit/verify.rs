//! Body verification and bookkeeping recomputation
//!
//! Mirrors the checks a host performs before installing a unit: every label
//! referenced is placed exactly once, regions are non-empty, the operand stack
//! never underflows, every merge point sees one consistent stack height
//! (handlers are entered with exactly the failure value on the stack) and
//! control never runs past the last instruction. The same walk yields the
//! `max_stack`/`max_locals` values a rewritten body must carry.

use super::{Instruction, Label, MethodBody, Signature};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("body has no instructions")]
    EmptyBody,

    #[error("label {0} placed more than once")]
    DuplicateLabel(Label),

    #[error("label {0} referenced but never placed")]
    UndefinedLabel(Label),

    #[error("exception region [{start}, {end}) is empty or inverted")]
    EmptyRegion { start: Label, end: Label },

    #[error("operand stack underflow at instruction {at}")]
    StackUnderflow { at: usize },

    #[error("stack height mismatch at instruction {at}: {expected} vs {found}")]
    StackMismatch { at: usize, expected: u32, found: u32 },

    #[error("control falls off the end of the body")]
    FallsOffEnd,

    #[error("{what} exceeds the {limit} limit")]
    LimitExceeded { what: &'static str, limit: u16 },
}

/// Recomputed bookkeeping for a verified body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Analysis {
    pub max_stack: u16,
    pub max_locals: u16,
}

struct Region {
    start: usize,
    end: usize,
    handler: usize,
}

/// Verify `body` and compute its stack/local maxima
pub fn analyze(body: &MethodBody, signature: &Signature) -> Result<Analysis, VerifyError> {
    if body.instructions.is_empty() {
        return Err(VerifyError::EmptyBody);
    }

    let labels = label_positions(body)?;
    let resolve = |label: Label| {
        labels
            .get(&label)
            .copied()
            .ok_or(VerifyError::UndefinedLabel(label))
    };

    for insn in &body.instructions {
        if let Some(target) = insn.branch_target() {
            resolve(target)?;
        }
    }
    for marker in &body.lines {
        resolve(marker.label)?;
    }

    let mut regions = Vec::with_capacity(body.regions.len());
    for r in &body.regions {
        let (start, end) = (resolve(r.start)?, resolve(r.end)?);
        if start >= end {
            return Err(VerifyError::EmptyRegion {
                start: r.start,
                end: r.end,
            });
        }
        regions.push(Region {
            start,
            end,
            handler: resolve(r.handler)?,
        });
    }

    let max_stack = stack_walk(body, &labels, &regions)?;

    let used_slots = body
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Instruction::Load(slot) | Instruction::Store(slot) => Some(u32::from(*slot) + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let params = u32::try_from(signature.params.len()).unwrap_or(u32::MAX);

    Ok(Analysis {
        max_stack: within_limit("operand stack", max_stack)?,
        max_locals: within_limit("local slots", used_slots.max(params))?,
    })
}

fn within_limit(what: &'static str, value: u32) -> Result<u16, VerifyError> {
    u16::try_from(value).map_err(|_| VerifyError::LimitExceeded {
        what,
        limit: u16::MAX,
    })
}

fn label_positions(body: &MethodBody) -> Result<HashMap<Label, usize>, VerifyError> {
    let mut labels = HashMap::new();
    for (i, insn) in body.instructions.iter().enumerate() {
        if let Instruction::Mark(label) = insn {
            if labels.insert(*label, i).is_some() {
                return Err(VerifyError::DuplicateLabel(*label));
            }
        }
    }
    Ok(labels)
}

/// Worklist dataflow over instruction indices; returns the maximum height seen
fn stack_walk(
    body: &MethodBody,
    labels: &HashMap<Label, usize>,
    regions: &[Region],
) -> Result<u32, VerifyError> {
    let n = body.instructions.len();
    let mut heights: Vec<Option<u32>> = vec![None; n];
    let mut worklist = vec![(0usize, 0u32)];
    let mut max_stack = 0u32;

    while let Some((at, height)) = worklist.pop() {
        if at >= n {
            return Err(VerifyError::FallsOffEnd);
        }
        match heights[at] {
            Some(expected) if expected == height => continue,
            Some(expected) => {
                return Err(VerifyError::StackMismatch {
                    at,
                    expected,
                    found: height,
                })
            }
            None => heights[at] = Some(height),
        }

        for region in regions.iter().filter(|r| r.start <= at && at < r.end) {
            max_stack = max_stack.max(1);
            worklist.push((region.handler, 1));
        }

        let insn = &body.instructions[at];
        let (pops, pushes) = insn.stack_effect();
        if height < pops {
            return Err(VerifyError::StackUnderflow { at });
        }
        let next = (height - pops)
            .checked_add(pushes)
            .filter(|h| *h <= u32::from(u16::MAX))
            .ok_or(VerifyError::LimitExceeded {
                what: "operand stack",
                limit: u16::MAX,
            })?;
        max_stack = max_stack.max(height).max(next);

        if let Some(target) = insn.branch_target() {
            // Targets were resolved before the walk
            if let Some(&index) = labels.get(&target) {
                worklist.push((index, next));
            }
        }
        if !insn.ends_flow() {
            worklist.push((at + 1, next));
        }
    }

    Ok(max_stack)
}
