//! The stack manager
//!
//! Operand stack, call frames, and label frames in one structure. The
//! interpreter consumes it through these operations: push/pop with typed
//! helpers, frame entry/exit, and the branch discipline that restores the
//! operand stack to a label's recorded height while preserving the
//! label's arity worth of values.

use crate::ast::types::ValueType;
use crate::runtime::func::{CodeBody, FunctionInstance};
use crate::runtime::module::ModuleInstance;
use crate::runtime::tag::TagInstance;
use crate::runtime::value::{Ref, Value};
use crate::runtime::Trap;
use std::sync::Arc;

/// What kind of control construct a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Block,
    Loop,
    If,
    Try,
}

/// A resolved catch clause of an active `try_table`.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Matching tag; `None` for catch_all clauses
    pub tag: Option<Arc<TagInstance>>,
    /// Whether the handler receives the exception reference
    pub capture_exn: bool,
    /// Absolute index of the target label in the frame's label stack
    pub label_index: usize,
}

/// A label frame: arity, branch target, and the operand-stack height at
/// entry (with the block parameters already excluded).
#[derive(Debug, Clone)]
pub struct Label {
    pub kind: LabelKind,
    /// Values preserved when branching to this label
    pub arity: usize,
    /// Operand stack height the branch restores to
    pub height: usize,
    /// PC a branch to this label continues at
    pub target: usize,
    /// PC of the matching `end`
    pub end: usize,
    /// Catch clauses when `kind == Try`
    pub handlers: Vec<Handler>,
}

/// A call frame.
#[derive(Debug)]
pub struct Frame {
    /// The function being executed; `None` for initializer-expression
    /// frames, which run module code without a function identity.
    pub func: Option<Arc<FunctionInstance>>,
    /// The module whose index spaces the frame's code resolves against
    pub module: Arc<ModuleInstance>,
    /// The instruction view this frame's `pc` indexes
    pub code: Arc<CodeBody>,
    /// Parameters followed by declared locals
    pub locals: Vec<Value>,
    pub labels: Vec<Label>,
    /// Result arity of the function
    pub arity: usize,
    /// Operand stack height at frame entry (arguments already popped)
    pub height: usize,
    /// Program counter within the frame's code body
    pub pc: usize,
}

/// The operand/label/frame stack consumed by the interpreter.
#[derive(Debug, Default)]
pub struct StackManager {
    values: Vec<Value>,
    frames: Vec<Frame>,
}

impl StackManager {
    pub fn new() -> StackManager {
        StackManager::default()
    }

    // ===== Operand stack =====

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    pub fn pop(&mut self) -> Result<Value, Trap> {
        // Underflow cannot happen on validated code; treat it as the
        // stack discipline failing, which surfaces as unreachable.
        self.values.pop().ok_or(Trap::Unreachable)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            _ => Err(Trap::Unreachable),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            _ => Err(Trap::Unreachable),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, Trap> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            _ => Err(Trap::Unreachable),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, Trap> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            _ => Err(Trap::Unreachable),
        }
    }

    pub fn pop_v128(&mut self) -> Result<[u8; 16], Trap> {
        match self.pop()? {
            Value::V128(v) => Ok(v),
            _ => Err(Trap::Unreachable),
        }
    }

    pub fn pop_ref(&mut self) -> Result<Ref, Trap> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            _ => Err(Trap::Unreachable),
        }
    }

    /// Pop `n` values, preserving their stack order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        if self.values.len() < n {
            return Err(Trap::Unreachable);
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn height(&self) -> usize {
        self.values.len()
    }

    pub fn truncate(&mut self, height: usize) {
        self.values.truncate(height);
    }

    // ===== Call frames =====

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self) -> Result<&Frame, Trap> {
        self.frames.last().ok_or(Trap::Unreachable)
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame, Trap> {
        self.frames.last_mut().ok_or(Trap::Unreachable)
    }

    /// The module instance the current frame executes against.
    pub fn current_module(&self) -> Result<Arc<ModuleInstance>, Trap> {
        Ok(self.frame()?.module.clone())
    }

    pub fn local(&self, idx: u32) -> Result<Value, Trap> {
        self.frame()?.locals.get(idx as usize).cloned().ok_or(Trap::Unreachable)
    }

    pub fn set_local(&mut self, idx: u32, value: Value) -> Result<(), Trap> {
        let frame = self.frame_mut()?;
        let slot = frame.locals.get_mut(idx as usize).ok_or(Trap::Unreachable)?;
        *slot = value;
        Ok(())
    }

    /// Function indices of the live frames, innermost first. Feeds the
    /// bounded stack trace on trap.
    pub fn frame_trace(&self) -> Vec<u32> {
        self.frames
            .iter()
            .rev()
            .filter_map(|f| f.func.as_ref().map(|func| func.func_idx()))
            .collect()
    }

    // ===== Labels =====

    pub fn push_label(&mut self, label: Label) -> Result<(), Trap> {
        self.frame_mut()?.labels.push(label);
        Ok(())
    }

    pub fn pop_label(&mut self) -> Result<Label, Trap> {
        self.frame_mut()?.labels.pop().ok_or(Trap::Unreachable)
    }

    pub fn label_count(&self) -> usize {
        self.frame().map(|f| f.labels.len()).unwrap_or(0)
    }

    /// The label `depth` steps from the innermost.
    pub fn label(&self, depth: u32) -> Result<&Label, Trap> {
        let labels = &self.frame()?.labels;
        let len = labels.len();
        if (depth as usize) >= len {
            return Err(Trap::Unreachable);
        }
        Ok(&labels[len - 1 - depth as usize])
    }

    /// Branch to the label at `depth`: restore the operand stack to the
    /// label's height preserving its arity worth of values, pop the
    /// crossed labels (a loop label survives, its branch re-enters the
    /// loop), and return the continuation PC.
    pub fn branch(&mut self, depth: u32) -> Result<usize, Trap> {
        let (arity, height, target, is_loop, label_pos) = {
            let label = self.label(depth)?;
            let pos = self.frame()?.labels.len() - 1 - depth as usize;
            (label.arity, label.height, label.target, label.kind == LabelKind::Loop, pos)
        };
        let preserved = self.pop_n(arity)?;
        self.truncate(height);
        self.push_all(preserved);
        let keep = if is_loop { label_pos + 1 } else { label_pos };
        self.frame_mut()?.labels.truncate(keep);
        Ok(target)
    }

    /// Build the locals vector for a call: arguments followed by the
    /// defaults of the declared locals.
    pub fn build_locals(args: Vec<Value>, declared: &[ValueType]) -> Vec<Value> {
        let mut locals = args;
        locals.reserve(declared.len());
        for ty in declared {
            locals.push(Value::default_for(*ty));
        }
        locals
    }
}
