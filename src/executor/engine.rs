//! The interpreter core
//!
//! A single dispatch loop advances a program counter over the current
//! frame's flat instruction view. Control-flow handlers compute the next
//! PC explicitly; every other handler falls through. Calls push (or, for
//! tail calls, replace) a frame and re-enter the loop; returns pop one.
//!
//! The loop checks the executor's stop token at function entry, at loop
//! back-edges, and at every call; a set token surfaces as `Interrupted`.

use crate::ast::instruction::{BlockType, Catch, CatchKind, Instruction};
use crate::ast::types::FunctionType;
use crate::executor::{ops, Executor};
use crate::runtime::stack::{Frame, Handler, Label, LabelKind, StackManager};
use crate::runtime::{
    CodeBody, ExceptionInstance, FunctionInstance, ModuleInstance, Ref, Trap, Value,
};
use std::sync::Arc;

/// Parameter and result arity of a block type.
fn block_signature(module: &ModuleInstance, ty: &BlockType) -> (usize, usize) {
    match ty {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::FuncType(idx) => module
            .func_type(*idx)
            .map(|ft: FunctionType| (ft.params.len(), ft.results.len()))
            .unwrap_or((0, 0)),
    }
}

/// Push (or replace, for a tail call) the frame for `func` and leave the
/// new PC at its first instruction. Arguments are taken from the operand
/// stack; for tail calls they replace the outgoing frame's locals and the
/// outgoing frame's stack region is discarded.
pub(crate) fn enter_function(
    ex: &Executor,
    stack: &mut StackManager,
    func: &Arc<FunctionInstance>,
    is_tail_call: bool,
) -> Result<(), Trap> {
    ex.check_stop()?;
    let module = func.defining_module().ok_or(Trap::AccessNullRef)?;
    let code = func.code().ok_or(Trap::Unreachable)?.clone();
    let args = stack.pop_n(func.ty().params.len())?;
    let locals = StackManager::build_locals(args, func.locals());
    let arity = func.ty().results.len();

    if is_tail_call {
        let outgoing = stack.pop_frame().ok_or(Trap::Unreachable)?;
        stack.truncate(outgoing.height);
        stack.push_frame(Frame {
            func: Some(func.clone()),
            module,
            code,
            locals,
            labels: Vec::new(),
            arity,
            height: outgoing.height,
            pc: 0,
        });
        return Ok(());
    }

    if stack.frame_count() >= ex.config.max_call_depth {
        return Err(Trap::CallStackExhausted);
    }
    stack.push_frame(Frame {
        func: Some(func.clone()),
        module,
        code,
        locals,
        labels: Vec::new(),
        arity,
        height: stack.height(),
        pc: 0,
    });
    Ok(())
}

/// Pop the current frame, carrying its result arity down to the caller.
fn do_return(stack: &mut StackManager) -> Result<(), Trap> {
    let frame = stack.pop_frame().ok_or(Trap::Unreachable)?;
    let results = stack.pop_n(frame.arity)?;
    stack.truncate(frame.height);
    stack.push_all(results);
    Ok(())
}

/// What a call resolved to, from the dispatch loop's point of view.
enum CallOutcome {
    /// Stay in the current frame, continuing at this PC (host or
    /// compiled callee already ran and pushed its results)
    Continue(usize),
    /// A frame was pushed, replaced, or popped: re-enter the outer loop
    Reenter,
}

/// Perform a call to `func`. `pc` is the call instruction's own PC.
fn do_call(
    ex: &Executor,
    stack: &mut StackManager,
    func: &Arc<FunctionInstance>,
    pc: usize,
    is_tail_call: bool,
) -> Result<CallOutcome, Trap> {
    ex.check_stop()?;
    if func.is_host() || func.aot_symbol().is_some() {
        let args = stack.pop_n(func.ty().params.len())?;
        if is_tail_call {
            // The outgoing frame is gone either way; the callee's results
            // become this frame's results.
            let outgoing = stack.pop_frame().ok_or(Trap::Unreachable)?;
            stack.truncate(outgoing.height);
            let results = if func.is_host() {
                ex.call_host(func, args)?
            } else {
                crate::executor::aot::call_compiled(ex, func, args)?
            };
            stack.push_all(results);
            Ok(CallOutcome::Reenter)
        } else {
            let results = if func.is_host() {
                ex.call_host(func, args)?
            } else {
                crate::executor::aot::call_compiled(ex, func, args)?
            };
            stack.push_all(results);
            Ok(CallOutcome::Continue(pc + 1))
        }
    } else {
        if !is_tail_call {
            stack.frame_mut()?.pc = pc + 1;
        }
        enter_function(ex, stack, func, is_tail_call)?;
        Ok(CallOutcome::Reenter)
    }
}

/// Resolve a `call_indirect` callee: table slot must be a non-null
/// function reference matching the expected signature.
fn resolve_indirect(
    module: &ModuleInstance,
    table_idx: u32,
    type_idx: u32,
    slot: u32,
) -> Result<Arc<FunctionInstance>, Trap> {
    let table = module.table(table_idx).ok_or(Trap::Unreachable)?;
    let r = table.get(slot).map_err(|_| Trap::UndefinedElement)?;
    match r {
        Ref::Null(_) => Err(Trap::UninitializedElement),
        Ref::Func(f) => {
            if crate::runtime::typing::func_matches_expected(&f, type_idx, module.types()) {
                Ok(f)
            } else {
                Err(Trap::IndirectCallTypeMismatch)
            }
        }
        _ => Err(Trap::UninitializedElement),
    }
}

/// Resolve the catch clauses of a `try_table` against the current label
/// stack. Clause labels are relative to the context enclosing the
/// `try_table`, so resolution happens before its own label is pushed.
fn resolve_handlers(
    stack: &StackManager,
    module: &ModuleInstance,
    catches: &[Catch],
) -> Result<Vec<Handler>, Trap> {
    let base = stack.label_count();
    let mut handlers = Vec::with_capacity(catches.len());
    for catch in catches {
        let depth = catch.label as usize;
        if depth >= base {
            return Err(Trap::Unreachable);
        }
        let label_index = base - 1 - depth;
        let (tag, capture_exn) = match catch.kind {
            CatchKind::Tag { tag_idx } => (Some(module.tag(tag_idx).ok_or(Trap::Unreachable)?), false),
            CatchKind::TagRef { tag_idx } => (Some(module.tag(tag_idx).ok_or(Trap::Unreachable)?), true),
            CatchKind::All => (None, false),
            CatchKind::AllRef => (None, true),
        };
        handlers.push(Handler {
            tag,
            capture_exn,
            label_index,
        });
    }
    Ok(handlers)
}

/// Unwind to the nearest matching handler of `exn`, popping frames as
/// needed. Leaves the target frame's PC at the handler's label target.
///
/// # Errors
/// `UncaughtException` when the exception would exit the frame at
/// `entry_depth` without a matching handler.
fn deliver_exception(
    stack: &mut StackManager,
    exn: Arc<ExceptionInstance>,
    entry_depth: usize,
) -> Result<(), Trap> {
    loop {
        let matched = {
            let frame = stack.frame()?;
            let mut found = None;
            'search: for label in frame.labels.iter().rev() {
                if label.kind != LabelKind::Try {
                    continue;
                }
                for handler in &label.handlers {
                    let hit = match &handler.tag {
                        None => true,
                        Some(tag) => Arc::ptr_eq(tag, &exn.tag),
                    };
                    if hit {
                        found = Some(handler.clone());
                        break 'search;
                    }
                }
            }
            found
        };

        if let Some(handler) = matched {
            let target = stack.frame()?.labels[handler.label_index].clone();
            stack.truncate(target.height);
            if handler.tag.is_some() {
                stack.push_all(exn.values.iter().cloned());
            }
            if handler.capture_exn {
                stack.push(Value::Ref(Ref::Exn(exn)));
            }
            let keep = if target.kind == LabelKind::Loop {
                handler.label_index + 1
            } else {
                handler.label_index
            };
            let frame = stack.frame_mut()?;
            frame.labels.truncate(keep);
            frame.pc = target.target;
            return Ok(());
        }

        // No handler here: the exception propagates to the caller.
        let frame = stack.pop_frame().ok_or(Trap::UncaughtException)?;
        stack.truncate(frame.height);
        if stack.frame_count() < entry_depth {
            return Err(Trap::UncaughtException);
        }
    }
}

/// Evaluate a constant expression on a transient stack against `module`,
/// returning its single result.
pub(crate) fn run_expression(
    ex: &Executor,
    module: &Arc<ModuleInstance>,
    instrs: &[Instruction],
) -> Result<Value, Trap> {
    let mut stack = StackManager::new();
    stack.push_frame(Frame {
        func: None,
        module: module.clone(),
        code: Arc::new(CodeBody::new(instrs.to_vec())),
        locals: Vec::new(),
        labels: Vec::new(),
        arity: 1,
        height: 0,
        pc: 0,
    });
    execute(ex, &mut stack, 1)?;
    stack.pop()
}

/// Run the dispatch loop until every frame at or above `entry_depth` has
/// returned.
pub(crate) fn execute(ex: &Executor, stack: &mut StackManager, entry_depth: usize) -> Result<(), Trap> {
    'frames: loop {
        if stack.frame_count() < entry_depth {
            return Ok(());
        }
        let (code, mut pc) = {
            let frame = stack.frame()?;
            (frame.code.clone(), frame.pc)
        };
        let module = stack.current_module()?;

        loop {
            if pc >= code.len() {
                do_return(stack)?;
                continue 'frames;
            }
            let instr = &code.instrs[pc];
            ex.count_instruction(1)?;

            match instr {
                // ======= Control =======
                Instruction::Unreachable => return Err(Trap::Unreachable),
                Instruction::Nop => pc += 1,
                Instruction::Block { ty } => {
                    let (params, results) = block_signature(&module, ty);
                    let bounds = code.bounds(pc).ok_or(Trap::Unreachable)?;
                    stack.push_label(Label {
                        kind: LabelKind::Block,
                        arity: results,
                        height: stack.height() - params,
                        target: bounds.end_pc + 1,
                        end: bounds.end_pc,
                        handlers: Vec::new(),
                    })?;
                    pc += 1;
                }
                Instruction::Loop { ty } => {
                    let (params, _) = block_signature(&module, ty);
                    let bounds = code.bounds(pc).ok_or(Trap::Unreachable)?;
                    stack.push_label(Label {
                        kind: LabelKind::Loop,
                        arity: params,
                        height: stack.height() - params,
                        target: pc + 1,
                        end: bounds.end_pc,
                        handlers: Vec::new(),
                    })?;
                    pc += 1;
                }
                Instruction::If { ty } => {
                    let cond = stack.pop_i32()?;
                    let (params, results) = block_signature(&module, ty);
                    let bounds = code.bounds(pc).ok_or(Trap::Unreachable)?;
                    stack.push_label(Label {
                        kind: LabelKind::If,
                        arity: results,
                        height: stack.height() - params,
                        target: bounds.end_pc + 1,
                        end: bounds.end_pc,
                        handlers: Vec::new(),
                    })?;
                    if cond != 0 {
                        pc += 1;
                    } else {
                        match bounds.else_pc {
                            Some(else_pc) => pc = else_pc + 1,
                            // No else arm: fall to the matching end,
                            // which pops the label.
                            None => pc = bounds.end_pc,
                        }
                    }
                }
                Instruction::Else => {
                    // Reached after the then-arm ran: skip to the end.
                    pc = stack.label(0)?.end;
                }
                Instruction::End => {
                    if stack.label_count() > 0 {
                        stack.pop_label()?;
                        pc += 1;
                    } else {
                        do_return(stack)?;
                        continue 'frames;
                    }
                }
                Instruction::Br { depth } => {
                    if stack.label(*depth)?.kind == LabelKind::Loop {
                        ex.check_stop()?;
                    }
                    pc = stack.branch(*depth)?;
                }
                Instruction::BrIf { depth } => {
                    if stack.pop_i32()? != 0 {
                        if stack.label(*depth)?.kind == LabelKind::Loop {
                            ex.check_stop()?;
                        }
                        pc = stack.branch(*depth)?;
                    } else {
                        pc += 1;
                    }
                }
                Instruction::BrTable { targets, default } => {
                    let i = stack.pop_i32()? as u32;
                    let depth = targets.get(i as usize).copied().unwrap_or(*default);
                    if stack.label(depth)?.kind == LabelKind::Loop {
                        ex.check_stop()?;
                    }
                    pc = stack.branch(depth)?;
                }
                Instruction::BrOnNull { depth } => {
                    let r = stack.pop_ref()?;
                    if r.is_null() {
                        pc = stack.branch(*depth)?;
                    } else {
                        stack.push(Value::Ref(r));
                        pc += 1;
                    }
                }
                Instruction::BrOnNonNull { depth } => {
                    let r = stack.pop_ref()?;
                    if r.is_null() {
                        pc += 1;
                    } else {
                        stack.push(Value::Ref(r));
                        pc = stack.branch(*depth)?;
                    }
                }
                Instruction::BrOnCast { depth, from: _, to } => {
                    let r = stack.pop_ref()?;
                    let hit = crate::runtime::typing::ref_matches(&r, to, module.types());
                    stack.push(Value::Ref(r));
                    if hit {
                        pc = stack.branch(*depth)?;
                    } else {
                        pc += 1;
                    }
                }
                Instruction::BrOnCastFail { depth, from: _, to } => {
                    let r = stack.pop_ref()?;
                    let hit = crate::runtime::typing::ref_matches(&r, to, module.types());
                    stack.push(Value::Ref(r));
                    if hit {
                        pc += 1;
                    } else {
                        pc = stack.branch(*depth)?;
                    }
                }
                Instruction::Return => {
                    do_return(stack)?;
                    continue 'frames;
                }
                Instruction::Call { func_idx } => {
                    let f = module.func(*func_idx).ok_or(Trap::Unreachable)?;
                    match do_call(ex, stack, &f, pc, false)? {
                        CallOutcome::Continue(next) => pc = next,
                        CallOutcome::Reenter => continue 'frames,
                    }
                }
                Instruction::CallIndirect { type_idx, table_idx } => {
                    let slot = stack.pop_i32()? as u32;
                    let f = resolve_indirect(&module, *table_idx, *type_idx, slot)?;
                    match do_call(ex, stack, &f, pc, false)? {
                        CallOutcome::Continue(next) => pc = next,
                        CallOutcome::Reenter => continue 'frames,
                    }
                }
                Instruction::CallRef { type_idx: _ } => {
                    let f = match stack.pop_ref()? {
                        Ref::Null(_) => return Err(Trap::AccessNullRef),
                        Ref::Func(f) => f,
                        _ => return Err(Trap::Unreachable),
                    };
                    match do_call(ex, stack, &f, pc, false)? {
                        CallOutcome::Continue(next) => pc = next,
                        CallOutcome::Reenter => continue 'frames,
                    }
                }
                Instruction::ReturnCall { func_idx } => {
                    let f = module.func(*func_idx).ok_or(Trap::Unreachable)?;
                    do_call(ex, stack, &f, pc, true)?;
                    continue 'frames;
                }
                Instruction::ReturnCallIndirect { type_idx, table_idx } => {
                    let slot = stack.pop_i32()? as u32;
                    let f = resolve_indirect(&module, *table_idx, *type_idx, slot)?;
                    do_call(ex, stack, &f, pc, true)?;
                    continue 'frames;
                }
                Instruction::ReturnCallRef { type_idx: _ } => {
                    let f = match stack.pop_ref()? {
                        Ref::Null(_) => return Err(Trap::AccessNullRef),
                        Ref::Func(f) => f,
                        _ => return Err(Trap::Unreachable),
                    };
                    do_call(ex, stack, &f, pc, true)?;
                    continue 'frames;
                }
                Instruction::TryTable { ty, catches } => {
                    let (params, results) = block_signature(&module, ty);
                    let bounds = code.bounds(pc).ok_or(Trap::Unreachable)?;
                    let handlers = resolve_handlers(stack, &module, catches)?;
                    stack.push_label(Label {
                        kind: LabelKind::Try,
                        arity: results,
                        height: stack.height() - params,
                        target: bounds.end_pc + 1,
                        end: bounds.end_pc,
                        handlers,
                    })?;
                    pc += 1;
                }
                Instruction::Throw { tag_idx } => {
                    let tag = module.tag(*tag_idx).ok_or(Trap::Unreachable)?;
                    let values = stack.pop_n(tag.arity())?;
                    let exn = Arc::new(ExceptionInstance::new(tag, values));
                    deliver_exception(stack, exn, entry_depth)?;
                    continue 'frames;
                }
                Instruction::ThrowRef => {
                    let exn = match stack.pop_ref()? {
                        Ref::Null(_) => return Err(Trap::AccessNullRef),
                        Ref::Exn(e) => e,
                        _ => return Err(Trap::Unreachable),
                    };
                    deliver_exception(stack, exn, entry_depth)?;
                    continue 'frames;
                }

                // ======= Parametric =======
                Instruction::Drop => {
                    stack.pop()?;
                    pc += 1;
                }
                Instruction::Select | Instruction::SelectTyped { .. } => {
                    let cond = stack.pop_i32()?;
                    let v2 = stack.pop()?;
                    let v1 = stack.pop()?;
                    stack.push(if cond != 0 { v1 } else { v2 });
                    pc += 1;
                }

                // ======= Variable =======
                Instruction::LocalGet { idx } => {
                    let v = stack.local(*idx)?;
                    stack.push(v);
                    pc += 1;
                }
                Instruction::LocalSet { idx } => {
                    let v = stack.pop()?;
                    stack.set_local(*idx, v)?;
                    pc += 1;
                }
                Instruction::LocalTee { idx } => {
                    let v = stack.pop()?;
                    stack.push(v.clone());
                    stack.set_local(*idx, v)?;
                    pc += 1;
                }
                Instruction::GlobalGet { idx } => {
                    let g = module.global(*idx).ok_or(Trap::Unreachable)?;
                    stack.push(g.get());
                    pc += 1;
                }
                Instruction::GlobalSet { idx } => {
                    let g = module.global(*idx).ok_or(Trap::Unreachable)?;
                    g.set(stack.pop()?);
                    pc += 1;
                }

                // ======= Everything else: family dispatch =======
                other => {
                    if let Some(result) = ops::numeric::run(other, stack) {
                        result?;
                    } else if let Some(result) = ops::conversion::run(other, stack) {
                        result?;
                    } else if let Some(result) = ops::memory::run(other, stack, &module) {
                        result?;
                    } else if let Some(result) = ops::table::run(other, stack, &module) {
                        result?;
                    } else if let Some(result) = ops::reference::run(other, stack, &module) {
                        result?;
                    } else if let Some(result) = ops::gc::run(other, stack, &module, &ex.config) {
                        result?;
                    } else if let Some(result) = ops::simd::run(other, stack, &module) {
                        result?;
                    } else if let Some(result) = ops::atomic::run(ex, other, stack, &module) {
                        result?;
                    } else {
                        return Err(Trap::Unreachable);
                    }
                    pc += 1;
                }
            }
        }
    }
}
