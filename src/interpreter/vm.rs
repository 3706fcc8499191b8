//! Execution engine.
//!
//! The engine runs a resolved [`Program`] over a segmented slot [`Memory`].
//! Besides memory it keeps a handful of registers: the program counter, the
//! data stack pointer, the frame pointer, the next free frame slot, the result
//! of the last comparison, the error flag and the last returned value.
//!
//! Errors raised by an instruction are either recoverable or fatal (see
//! [`RuntimeError::is_recoverable`]). A recoverable error sets the error flag
//! and execution continues; the program observes it with `jer`/`jnr`. Halting
//! with an error nobody looked at, or raising a second one before the first was
//! looked at, is fatal.

pub mod frame;
pub mod memory;
mod value;


pub use memory::{Layout, Memory, Region};
pub use value::Value;

use crate::debug;
use crate::interpreter::errors::{Fault, RuntimeError};
use crate::interpreter::isa::Opcode;
use crate::interpreter::operand::{AddrExpr, Binding, Operand, Source, Target};
use crate::interpreter::program::{FunctionId, Instruction, Program};
use frame::FrameRecord;
use std::cmp::Ordering;
use std::io::Write;
use std::rc::Rc;

/// Dispatches an instruction to its `op_*` handler, decoding operands by mode.
macro_rules! exec_vm {
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        let mut operands = $instr.operands.iter();
        match $instr.opcode {
            $(
                Opcode::$variant => {
                    let instr_name = Opcode::$variant.mnemonic();
                    $( let $field = exec_vm!(@read $vm, operands, instr_name, $kind)?; )*
                    $vm.$handler(instr_name, $( $field ),*)
                }
            ),*
        }
    }};

    // Literal value
    (@read $vm:ident, $ops:ident, $name:ident, Val) => {
        match $ops.next() {
            Some(Operand::Val(value)) => Ok(value.clone()),
            _ => Err(RuntimeError::MalformedInstruction { instruction: $name }),
        }
    };

    // Evaluated value
    (@read $vm:ident, $ops:ident, $name:ident, RVal) => {
        match $ops.next() {
            Some(Operand::RVal(source)) => $vm.eval(source),
            _ => Err(RuntimeError::MalformedInstruction { instruction: $name }),
        }
    };

    // Writable slot address
    (@read $vm:ident, $ops:ident, $name:ident, LVal) => {
        match $ops.next() {
            Some(Operand::LVal(expr)) => $vm.address(expr),
            _ => Err(RuntimeError::MalformedInstruction { instruction: $name }),
        }
    };

    // Readable binding
    (@read $vm:ident, $ops:ident, $name:ident, RVar) => {
        match $ops.next() {
            Some(Operand::RVar(binding)) => $vm.bound(binding),
            _ => Err(RuntimeError::MalformedInstruction { instruction: $name }),
        }
    };

    // Writable binding
    (@read $vm:ident, $ops:ident, $name:ident, LVar) => {
        match $ops.next() {
            Some(Operand::LVar(target)) => Ok(target),
            _ => Err(RuntimeError::MalformedInstruction { instruction: $name }),
        }
    };
}

/// Lifecycle of an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Halted,
    Faulted,
}

/// A recoverable error waiting to be handled.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingError {
    pub error: RuntimeError,
    /// Set once `jnr` has looked at the error without clearing it.
    pub observed: bool,
}

/// Interpreter for an assembled [`Program`], printing to `out`.
pub struct Vm<W: Write> {
    program: Rc<Program>,
    memory: Memory,
    pc: usize,
    /// Next free data stack slot.
    sp: usize,
    /// Base of the current function's locals.
    fp: usize,
    /// Next free frame record slot.
    frp: usize,
    function: Option<FunctionId>,
    comparison: Option<Ordering>,
    error: Option<PendingError>,
    returned: Option<Value>,
    state: ExecState,
    out: W,
}

impl<W: Write> Vm<W> {
    /// Creates an engine and binds every declared function to its global slot.
    pub fn new(program: Program, out: W) -> Result<Self, Fault> {
        let memory = Memory::new(&program.limits);
        let layout = *memory.layout();
        let mut vm = Self {
            program: Rc::new(program),
            memory,
            pc: 0,
            sp: layout.stack_start,
            fp: layout.stack_start,
            frp: layout.frame_start,
            function: None,
            comparison: None,
            error: None,
            returned: None,
            state: ExecState::Running,
            out,
        };

        let program = Rc::clone(&vm.program);
        for (i, function) in program.functions.iter().enumerate() {
            vm.memory
                .write(function.slot, Value::Function(FunctionId(i)))
                .map_err(|error| vm.fault(error, 0))?;
        }
        Ok(vm)
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Ordering stored by the last `cmp`, `None` if it failed or never ran.
    pub fn comparison(&self) -> Option<Ordering> {
        self.comparison
    }

    pub fn error_flag(&self) -> Option<&PendingError> {
        self.error.as_ref()
    }

    /// Current value of a global variable.
    pub fn global(&self, name: &str) -> Option<&Value> {
        let addr = *self.program.globals.get(name)?;
        self.memory.read(addr).ok()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Runs until the program halts or faults.
    pub fn run(&mut self) -> Result<(), Fault> {
        while self.state == ExecState::Running {
            self.step()?;
        }
        Ok(())
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> Result<(), Fault> {
        if self.state != ExecState::Running {
            return Ok(());
        }

        let pc = self.pc;
        let program = Rc::clone(&self.program);
        let Some(instruction) = program.instructions.get(pc) else {
            return self.halt();
        };
        self.pc += 1;

        match self.exec(instruction) {
            Ok(()) => Ok(()),
            Err(error) if error.is_recoverable() => {
                debug!("recoverable error at instruction {pc}: {error}");
                match self.error.take() {
                    Some(pending) if !pending.observed => Err(self.fail(
                        RuntimeError::Unchecked(Box::new(pending.error)),
                        pc,
                    )),
                    _ => {
                        self.error = Some(PendingError {
                            error,
                            observed: false,
                        });
                        Ok(())
                    }
                }
            }
            Err(error) => Err(self.fail(error, pc)),
        }
    }

    fn fault(&self, error: RuntimeError, pc: usize) -> Fault {
        Fault {
            error,
            pc,
            location: self.program.location_of(pc),
        }
    }

    fn fail(&mut self, error: RuntimeError, pc: usize) -> Fault {
        self.state = ExecState::Faulted;
        self.fault(error, pc)
    }

    /// Stops execution. Fails if a recoverable error was never looked at.
    fn halt(&mut self) -> Result<(), Fault> {
        match &self.error {
            Some(pending) if !pending.observed => {
                let error = RuntimeError::Unchecked(Box::new(pending.error.clone()));
                let pc = self.pc.saturating_sub(1);
                Err(self.fail(error, pc))
            }
            _ => {
                self.state = ExecState::Halted;
                Ok(())
            }
        }
    }

    fn exec(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                Nop => op_nop(),
                Cmp => op_cmp(lhs: RVal, rhs: RVal),
                Cpy => op_cpy(dst: LVal, src: RVal),
                Typ => op_typ(dst: LVal, name: Val),
                Prt => op_prt(value: Val),
                Prv => op_prv(name: Val),
                Spr => op_spr(dst: LVal, src: RVal),
                Psh => op_psh(src: RVal),
                Pop => op_pop(dst: LVal),
                Run => op_run(args: RVal, callee: RVar),
                Get => op_get(dst: LVar),
                Ret => op_ret(value: RVar),
                Fun => op_fun(slot: LVal, params: LVar),
                All => op_all(dst: LVal, size: RVal),
                Del => op_del(addr: RVal),
                Die => op_die(),
                Err => op_err(),
                Rea => op_rea(dst: LVal, src: RVal),
                Jmp => op_jmp(target: RVal),
                Jeq => op_jeq(target: RVal),
                Jne => op_jne(target: RVal),
                Jgt => op_jgt(target: RVal),
                Jlt => op_jlt(target: RVal),
                Jge => op_jge(target: RVal),
                Jle => op_jle(target: RVal),
                Jer => op_jer(target: RVal),
                Jnr => op_jnr(target: RVal),
                Add => op_add(dst: LVal, lhs: RVal, rhs: RVal),
                Sub => op_sub(dst: LVal, lhs: RVal, rhs: RVal),
                Mul => op_mul(dst: LVal, lhs: RVal, rhs: RVal),
                Div => op_div(dst: LVal, lhs: RVal, rhs: RVal),
                Mod => op_mod(dst: LVal, lhs: RVal, rhs: RVal),
                Inc1 => op_inc1(dst: LVal),
                Inc2 => op_inc2(dst: LVal, amount: RVal),
                Dec1 => op_dec1(dst: LVal),
                Dec2 => op_dec2(dst: LVal, amount: RVal),
                Bor => op_bor(dst: LVal, lhs: RVal, rhs: RVal),
                And => op_and(dst: LVal, lhs: RVal, rhs: RVal),
                Xor => op_xor(dst: LVal, lhs: RVal, rhs: RVal),
                Inv => op_inv(dst: LVal, lhs: RVal, mask: RVal),
                Shl => op_shl(dst: LVal, lhs: RVal, rhs: RVal),
                Shr => op_shr(dst: LVal, lhs: RVal, rhs: RVal),
                Usr => op_usr(dst: LVal, lhs: RVal, rhs: RVal),
            }
        }
    }

    // ------------------------------------------------------------------
    // Operand decoding
    // ------------------------------------------------------------------

    /// Computes the raw integer an address expression denotes.
    fn eval_addr(&self, expr: &AddrExpr) -> Result<i64, RuntimeError> {
        Ok(match expr {
            AddrExpr::Const(c) => *c,
            AddrExpr::Global(addr) => *addr as i64,
            AddrExpr::Local(offset) => (self.fp + offset) as i64,
            AddrExpr::Load(inner) => {
                let addr = self.address(inner)?;
                self.memory.read(addr)?.as_int("address")?
            }
            AddrExpr::Add(a, b) => self.eval_addr(a)?.wrapping_add(self.eval_addr(b)?),
            AddrExpr::Sub(a, b) => self.eval_addr(a)?.wrapping_sub(self.eval_addr(b)?),
        })
    }

    fn address(&self, expr: &AddrExpr) -> Result<usize, RuntimeError> {
        self.memory.address(self.eval_addr(expr)?)
    }

    fn eval(&self, source: &Source) -> Result<Value, RuntimeError> {
        Ok(match source {
            Source::Literal(value) => value.clone(),
            Source::Place(expr) => self.memory.read(self.address(expr)?)?.clone(),
            Source::Variadic(items) => Value::Compound(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            ),
            Source::Function(id) => Value::Function(*id),
            Source::Label(addr) => Value::Int(*addr as i64),
        })
    }

    fn bound(&self, binding: &Binding) -> Result<Value, RuntimeError> {
        Ok(match binding {
            Binding::Place(expr) => self.memory.read(self.address(expr)?)?.clone(),
            Binding::Function(id) => Value::Function(*id),
            Binding::Label(addr) => Value::Int(*addr as i64),
        })
    }

    /// Finds a variable by name: locals of the running function first, then globals.
    fn lookup(&self, name: &str) -> Result<usize, RuntimeError> {
        if let Some(id) = self.function
            && let Some(offset) = self.program.functions[id.0].local(name)
        {
            return Ok(self.fp + offset);
        }
        self.program
            .globals
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownVariable {
                name: name.to_string(),
            })
    }

    fn write_out(&mut self, value: &Value) -> Result<(), RuntimeError> {
        write!(self.out, "{value}")
            .and_then(|()| self.out.flush())
            .map_err(|e| RuntimeError::Output {
                reason: e.to_string(),
            })
    }

    /// Lowest stack slot `pop` may read: just above the current locals.
    fn stack_floor(&self) -> usize {
        self.fp
            + self
                .function
                .map_or(0, |id| self.program.functions[id.0].frame_size())
    }

    fn jump_to(&mut self, target: &Value) -> Result<(), RuntimeError> {
        let raw = target.as_int("jump")?;
        match usize::try_from(raw) {
            Ok(addr) if addr <= self.program.instructions.len() => {
                self.pc = addr;
                Ok(())
            }
            _ => Err(RuntimeError::InvalidJumpTarget { target: raw }),
        }
    }

    fn jump_if(&mut self, target: Value, taken: impl Fn(Ordering) -> bool) -> Result<(), RuntimeError> {
        match self.comparison {
            Some(order) if taken(order) => self.jump_to(&target),
            _ => Ok(()),
        }
    }

    fn arith(
        &mut self,
        instr: &'static str,
        dst: usize,
        lhs: Value,
        rhs: Value,
        op: fn(&Value, &'static str, &Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let result = op(&lhs, instr, &rhs)?;
        self.memory.write(dst, result)
    }

    fn bitwise(
        &mut self,
        instr: &'static str,
        dst: usize,
        lhs: Value,
        rhs: Value,
        op: fn(i64, i64) -> i64,
    ) -> Result<(), RuntimeError> {
        let a = lhs.as_int(instr)?;
        let b = rhs.as_int(instr)?;
        self.memory.write(dst, Value::Int(op(a, b)))
    }

    fn shift(
        &mut self,
        instr: &'static str,
        dst: usize,
        lhs: Value,
        rhs: Value,
        op: fn(i64, u32) -> i64,
    ) -> Result<(), RuntimeError> {
        let a = lhs.as_int(instr)?;
        let amount = rhs.as_int(instr)?;
        let amount = u32::try_from(amount)
            .ok()
            .filter(|n| *n < 64)
            .ok_or(RuntimeError::InvalidShift { amount })?;
        self.memory.write(dst, Value::Int(op(a, amount)))
    }

    // ------------------------------------------------------------------
    // General
    // ------------------------------------------------------------------

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn op_cmp(&mut self, _instr: &'static str, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.comparison = lhs.compare(&rhs);
        match self.comparison {
            Some(_) => Ok(()),
            None => Err(RuntimeError::Incomparable {
                left: lhs.type_name(),
                right: rhs.type_name(),
            }),
        }
    }

    fn op_cpy(&mut self, _instr: &'static str, dst: usize, src: Value) -> Result<(), RuntimeError> {
        self.memory.write(dst, src)
    }

    fn op_typ(&mut self, instr: &'static str, dst: usize, name: Value) -> Result<(), RuntimeError> {
        let addr = self.lookup(name.as_str(instr)?)?;
        let tag = self.memory.read(addr)?.type_name();
        self.memory.write(dst, Value::Str(tag.to_string()))
    }

    fn op_prt(&mut self, _instr: &'static str, value: Value) -> Result<(), RuntimeError> {
        self.write_out(&value)
    }

    fn op_prv(&mut self, instr: &'static str, name: Value) -> Result<(), RuntimeError> {
        let addr = self.lookup(name.as_str(instr)?)?;
        let value = self.memory.read(addr)?.clone();
        self.write_out(&value)
    }

    fn op_spr(&mut self, instr: &'static str, dst: usize, src: Value) -> Result<(), RuntimeError> {
        let items = match src {
            Value::Compound(items) => items,
            other => {
                return Err(RuntimeError::TypeMismatch {
                    instruction: instr,
                    expected: "compound",
                    actual: other.type_name(),
                });
            }
        };
        for (i, item) in items.into_iter().enumerate() {
            self.memory.write(dst + i, item)?;
        }
        Ok(())
    }

    fn op_psh(&mut self, _instr: &'static str, src: Value) -> Result<(), RuntimeError> {
        if self.sp >= self.memory.layout().heap_start {
            return Err(RuntimeError::StackOverflow);
        }
        self.memory.write(self.sp, src)?;
        self.sp += 1;
        Ok(())
    }

    fn op_pop(&mut self, _instr: &'static str, dst: usize) -> Result<(), RuntimeError> {
        if self.sp <= self.stack_floor() {
            return Err(RuntimeError::StackUnderflow);
        }
        self.sp -= 1;
        let value = self.memory.read(self.sp)?.clone();
        self.memory.write(dst, value)
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn op_run(&mut self, _instr: &'static str, args: Value, callee: Value) -> Result<(), RuntimeError> {
        let args = match args {
            Value::Compound(items) => items,
            single => vec![single],
        };

        let (entry, function, frame_size) = match callee {
            Value::Function(id) => {
                let f = &self.program.functions[id.0];
                if f.params != args.len() {
                    return Err(RuntimeError::CallArity {
                        expected: f.params,
                        actual: args.len(),
                    });
                }
                (Value::Int(f.entry as i64), Some(id), f.frame_size())
            }
            Value::Int(_) if !args.is_empty() => {
                return Err(RuntimeError::CallArity {
                    expected: 0,
                    actual: args.len(),
                });
            }
            Value::Int(_) => (callee, None, 0),
            other => {
                return Err(RuntimeError::NotCallable {
                    actual: other.type_name(),
                });
            }
        };

        let layout = *self.memory.layout();
        if self.frp + FrameRecord::SLOTS > layout.stack_start {
            return Err(RuntimeError::FrameOverflow {
                depth: (layout.stack_start - layout.frame_start) / FrameRecord::SLOTS,
            });
        }
        if self.sp + frame_size > layout.heap_start {
            return Err(RuntimeError::StackOverflow);
        }

        let record = FrameRecord {
            return_pc: self.pc,
            saved_fp: self.fp,
            function: self.function,
        };
        record.store(&mut self.memory, self.frp)?;
        self.frp += FrameRecord::SLOTS;

        self.fp = self.sp;
        for offset in 0..frame_size {
            self.memory.write(self.fp + offset, Value::default())?;
        }
        for (offset, arg) in args.into_iter().enumerate().take(frame_size) {
            self.memory.write(self.fp + offset, arg)?;
        }
        self.sp = self.fp + frame_size;
        self.function = function;
        debug!("call {:?} at depth {}", function, (self.frp - layout.frame_start) / FrameRecord::SLOTS);
        self.jump_to(&entry)
    }

    fn op_get(&mut self, _instr: &'static str, dst: &Target) -> Result<(), RuntimeError> {
        let value = self.returned.clone().ok_or(RuntimeError::NoReturnValue)?;
        match dst {
            Target::Place(expr) => {
                let addr = self.address(expr)?;
                self.memory.write(addr, value)
            }
            Target::Params(_) => Err(RuntimeError::MalformedInstruction { instruction: "get" }),
        }
    }

    fn op_ret(&mut self, _instr: &'static str, value: Value) -> Result<(), RuntimeError> {
        let frame_start = self.memory.layout().frame_start;
        if self.frp < frame_start + FrameRecord::SLOTS {
            return Err(RuntimeError::ReturnWithoutCall);
        }
        let at = self.frp - FrameRecord::SLOTS;
        let record = FrameRecord::load(&self.memory, at, self.program.functions.len())?;
        self.frp = at;
        self.sp = self.fp;
        self.fp = record.saved_fp;
        self.function = record.function;
        self.returned = Some(value);
        self.jump_to(&Value::Int(record.return_pc as i64))
    }

    /// Reached by falling through a declaration: rebinds the name and skips the body.
    fn op_fun(&mut self, _instr: &'static str, slot: usize, params: &Target) -> Result<(), RuntimeError> {
        let Target::Params(id) = params else {
            return Err(RuntimeError::MalformedInstruction { instruction: "fun" });
        };
        self.memory.write(slot, Value::Function(*id))?;
        self.pc = self.program.functions[id.0].end;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heap
    // ------------------------------------------------------------------

    fn op_all(&mut self, instr: &'static str, dst: usize, size: Value) -> Result<(), RuntimeError> {
        let size = size.as_int(instr)?;
        let slots = usize::try_from(size)
            .ok()
            .filter(|n| *n > 0)
            .ok_or(RuntimeError::InvalidAllocationSize { size })?;
        let base = self.memory.allocate(slots)?;
        self.memory.write(dst, Value::Int(base as i64))
    }

    fn op_del(&mut self, instr: &'static str, addr: Value) -> Result<(), RuntimeError> {
        let addr = self.memory.address(addr.as_int(instr)?)?;
        self.memory.free(addr)
    }

    // ------------------------------------------------------------------
    // Termination and errors
    // ------------------------------------------------------------------

    /// Stops the run here, so an unobserved error is reported against this instruction.
    fn op_die(&mut self, _instr: &'static str) -> Result<(), RuntimeError> {
        if let Some(pending) = &self.error
            && !pending.observed
        {
            return Err(RuntimeError::Unchecked(Box::new(pending.error.clone())));
        }
        self.pc = self.program.instructions.len();
        Ok(())
    }

    fn op_err(&mut self, _instr: &'static str) -> Result<(), RuntimeError> {
        Err(RuntimeError::Raised)
    }

    fn op_rea(&mut self, instr: &'static str, dst: usize, src: Value) -> Result<(), RuntimeError> {
        let mismatch = |expected, actual| RuntimeError::TypeMismatch {
            instruction: instr,
            expected,
            actual,
        };
        let parts = match src {
            Value::Compound(parts) => parts,
            other => {
                return Err(mismatch(
                    "(collection index) or (collection start end)",
                    other.type_name(),
                ));
            }
        };
        let (collection, start, end) = match parts.as_slice() {
            [collection, index] => (collection, index.as_int(instr)?, None),
            [collection, start, end] => (collection, start.as_int(instr)?, Some(end.as_int(instr)?)),
            _ => {
                return Err(mismatch(
                    "(collection index) or (collection start end)",
                    "compound of another length",
                ));
            }
        };

        let index = |i: i64, len: usize, inclusive: bool| {
            usize::try_from(i)
                .ok()
                .filter(|i| *i < len || (inclusive && *i == len))
                .ok_or(RuntimeError::IndexOutOfRange { index: i, len })
        };
        let span = |end: i64, len: usize| -> Result<(usize, usize), RuntimeError> {
            let (i, j) = (index(start, len, true)?, index(end, len, true)?);
            if j < i {
                return Err(RuntimeError::IndexOutOfRange { index: end, len });
            }
            Ok((i, j))
        };

        let value = match (collection, end) {
            (Value::Compound(items), None) => items[index(start, items.len(), false)?].clone(),
            (Value::Compound(items), Some(end)) => {
                let (i, j) = span(end, items.len())?;
                Value::Compound(items[i..j].to_vec())
            }
            (Value::Str(s), None) => {
                let i = index(start, s.chars().count(), false)?;
                Value::Str(s.chars().skip(i).take(1).collect())
            }
            (Value::Str(s), Some(end)) => {
                let (i, j) = span(end, s.chars().count())?;
                Value::Str(s.chars().skip(i).take(j - i).collect())
            }
            (other, _) => return Err(mismatch("compound or str", other.type_name())),
        };
        self.memory.write(dst, value)
    }

    // ------------------------------------------------------------------
    // Jumps
    // ------------------------------------------------------------------

    fn op_jmp(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_to(&target)
    }

    fn op_jeq(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_eq)
    }

    fn op_jne(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_ne)
    }

    fn op_jgt(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_gt)
    }

    fn op_jlt(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_lt)
    }

    fn op_jge(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_ge)
    }

    fn op_jle(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        self.jump_if(target, Ordering::is_le)
    }

    fn op_jer(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        if self.error.take().is_some() {
            return self.jump_to(&target);
        }
        Ok(())
    }

    fn op_jnr(&mut self, _instr: &'static str, target: Value) -> Result<(), RuntimeError> {
        match &mut self.error {
            None => self.jump_to(&target),
            Some(pending) => {
                pending.observed = true;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    fn op_add(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.arith(instr, dst, lhs, rhs, Value::add)
    }

    fn op_sub(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.arith(instr, dst, lhs, rhs, Value::sub)
    }

    fn op_mul(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.arith(instr, dst, lhs, rhs, Value::mul)
    }

    fn op_div(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.arith(instr, dst, lhs, rhs, Value::div)
    }

    fn op_mod(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.arith(instr, dst, lhs, rhs, Value::rem)
    }

    fn op_inc1(&mut self, instr: &'static str, dst: usize) -> Result<(), RuntimeError> {
        self.op_inc2(instr, dst, Value::Int(1))
    }

    fn op_inc2(&mut self, instr: &'static str, dst: usize, amount: Value) -> Result<(), RuntimeError> {
        let current = self.memory.read(dst)?.clone();
        if let Value::Str(_) | Value::Compound(_) = current {
            return Err(RuntimeError::TypeMismatch {
                instruction: instr,
                expected: "a number",
                actual: current.type_name(),
            });
        }
        self.arith(instr, dst, current, amount, Value::add)
    }

    fn op_dec1(&mut self, instr: &'static str, dst: usize) -> Result<(), RuntimeError> {
        self.op_dec2(instr, dst, Value::Int(1))
    }

    fn op_dec2(&mut self, instr: &'static str, dst: usize, amount: Value) -> Result<(), RuntimeError> {
        let current = self.memory.read(dst)?.clone();
        self.arith(instr, dst, current, amount, Value::sub)
    }

    // ------------------------------------------------------------------
    // Bitwise
    // ------------------------------------------------------------------

    fn op_bor(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.bitwise(instr, dst, lhs, rhs, |a, b| a | b)
    }

    fn op_and(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.bitwise(instr, dst, lhs, rhs, |a, b| a & b)
    }

    fn op_xor(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.bitwise(instr, dst, lhs, rhs, |a, b| a ^ b)
    }

    fn op_inv(&mut self, instr: &'static str, dst: usize, lhs: Value, mask: Value) -> Result<(), RuntimeError> {
        self.bitwise(instr, dst, lhs, mask, |a, m| !a & m)
    }

    fn op_shl(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.shift(instr, dst, lhs, rhs, |a, n| a << n)
    }

    fn op_shr(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.shift(instr, dst, lhs, rhs, |a, n| a >> n)
    }

    fn op_usr(&mut self, instr: &'static str, dst: usize, lhs: Value, rhs: Value) -> Result<(), RuntimeError> {
        self.shift(instr, dst, lhs, rhs, |a, n| ((a as u64) >> n) as i64)
    }
}
