use crate::bytecode::{opcode, Opcode, WasmBuffer};
use crate::exec::error::Trap;
use crate::exec::instance::Instance;
use crate::exec::operand_stack::OperandStack;
use crate::exec::value::Value;
use crate::parse::{Module, Signature};
use tracing::trace;

/// Recursion bound for the `call` opcodes; runaway recursion traps instead
/// of exhausting the native stack.
const MAX_CALL_DEPTH: usize = 1024;

/// Instantiates `module` and runs its `main` export with `args`.
///
/// The module must already have been branch-rewritten; any remaining
/// structured branch traps as an illegal bytecode. The start function, when
/// declared, runs first.
pub fn run(module: &Module, args: &[Value]) -> Result<Vec<Value>, Trap> {
	let mut interp = Interpreter {
		module,
		instance: Instance::new(module)?,
		stack: OperandStack::default(),
		depth: 0,
	};

	if let Some(start) = module.start_func {
		trace!("running start function #{start}");
		interp.invoke(start)?;
	}

	let main_index = module.main_func.ok_or(Trap::NoMainFunction)?;
	for arg in args {
		interp.stack.push(arg.clone());
	}
	interp.invoke(main_index)?;

	let signature = interp.signature(main_index)?;
	let mut results = Vec::new();
	for _ in &signature.results {
		results.push(interp.stack.pop_value()?);
	}
	Ok(results)
}

struct Interpreter<'m> {
	module: &'m Module,
	instance: Instance,
	stack: OperandStack,
	depth: usize,
}

impl<'m> Interpreter<'m> {
	fn signature(&self, func_index: u32) -> Result<&'m Signature, Trap> {
		let func = self
			.module
			.funcs
			.get(func_index as usize)
			.ok_or(Trap::FunctionIndexOutOfBounds {
				index: func_index,
				len: self.module.funcs.len(),
			})?;
		self.module
			.signatures
			.get(func.sig_index as usize)
			.ok_or(Trap::SignatureOutOfBounds(func.sig_index))
	}

	/// Calls a function: pops its arguments off the operand stack, executes
	/// the body (or intrinsic), and leaves the result on the stack.
	fn invoke(&mut self, func_index: u32) -> Result<(), Trap> {
		let func = self
			.module
			.funcs
			.get(func_index as usize)
			.ok_or(Trap::FunctionIndexOutOfBounds {
				index: func_index,
				len: self.module.funcs.len(),
			})?;
		let signature = self
			.module
			.signatures
			.get(func.sig_index as usize)
			.ok_or(Trap::SignatureOutOfBounds(func.sig_index))?;

		// arguments sit on the stack with the last parameter on top
		let mut locals = Vec::with_capacity(signature.params.len() + func.locals.len());
		for _ in &signature.params {
			locals.push(self.stack.pop_value()?);
		}
		locals.reverse();

		if let Some(intrinsic) = func.intrinsic {
			if let Some(result) = intrinsic.invoke(&locals)? {
				self.stack.push(result);
			}
			return Ok(());
		}

		for val_type in &func.locals {
			locals.push(Value::default_for(*val_type));
		}

		self.depth += 1;
		if self.depth > MAX_CALL_DEPTH {
			return Err(Trap::CallStackExhausted);
		}
		trace!("invoke func #{func_index} at depth {}", self.depth);

		let base = self.stack.len();
		self.exec_body(self.module.body(func), &mut locals)?;

		// unwind the frame, keeping only the declared result
		if signature.results.is_empty() {
			self.stack.truncate(base);
		} else {
			let result = self.stack.pop_value()?;
			self.stack.truncate(base);
			self.stack.push(result);
		}
		self.depth -= 1;
		Ok(())
	}

	fn exec_body(&mut self, body: &[u8], locals: &mut Vec<Value>) -> Result<(), Trap> {
		let mut pc = 0usize;
		while pc < body.len() {
			let code = body[pc];
			let op = Opcode::try_from(code).map_err(|_| Trap::IllegalBytecode(code))?;
			trace!("+{pc:<4} {}", opcode::mnemonic(code));
			let mut buf = WasmBuffer::at(body, pc + 1);
			match op {
				Opcode::Unreachable => return Err(Trap::Unreachable),
				Opcode::Nop | Opcode::End => {}
				Opcode::Block | Opcode::Loop => {
					buf.read_i32_leb()?; // block type
				}
				Opcode::Jmp => {
					let imm_pos = buf.pos();
					let (delta, _) = buf.read_i32_leb()?;
					pc = jump_target(imm_pos, delta)?;
					continue;
				}
				Opcode::JmpIf => {
					let imm_pos = buf.pos();
					let (delta, _) = buf.read_i32_leb()?;
					let cond: i32 = self.stack.pop()?;
					if cond != 0 {
						pc = jump_target(imm_pos, delta)?;
						continue;
					}
				}
				Opcode::JmpTable => {
					let (count, _) = buf.read_u32_leb()?;
					let labels_base = buf.pos();
					let index: u32 = self.stack.pop()?;
					// each label is a 4-byte padded delta; out-of-range
					// indices select the trailing default label
					let label_pos = labels_base + index.min(count) as usize * 4;
					let (delta, _) = WasmBuffer::at(body, label_pos).read_i32_leb()?;
					pc = jump_target(label_pos, delta)?;
					continue;
				}
				Opcode::Return => return Ok(()),
				Opcode::Call => {
					let (func_index, _) = buf.read_u32_leb()?;
					self.invoke(func_index)?;
				}
				Opcode::CallIndirect => {
					let (expected_sig, _) = buf.read_u32_leb()?;
					let (table_index, _) = buf.read_u32_leb()?;
					if table_index != 0 {
						return Err(Trap::IllegalBytecode(code));
					}
					let elem: u32 = self.stack.pop()?;
					let slot = self
						.instance
						.table
						.get(elem as usize)
						.copied()
						.ok_or(Trap::TableOutOfBounds { index: elem })?;
					let func_index = slot.ok_or(Trap::UninitializedElement { index: elem })?;
					let expected = self
						.module
						.signatures
						.get(expected_sig as usize)
						.ok_or(Trap::SignatureOutOfBounds(expected_sig))?;
					if self.signature(func_index)? != expected {
						return Err(Trap::IndirectCallTypeMismatch);
					}
					self.invoke(func_index)?;
				}
				Opcode::Drop => {
					self.stack.pop_value()?;
				}
				Opcode::Select => {
					let cond: i32 = self.stack.pop()?;
					let on_false = self.stack.pop_value()?;
					let on_true = self.stack.pop_value()?;
					self.stack.push(if cond != 0 { on_true } else { on_false });
				}
				Opcode::LocalGet => {
					let (index, _) = buf.read_u32_leb()?;
					let value = locals
						.get(index as usize)
						.ok_or(Trap::LocalIndexOutOfBounds(index))?
						.clone();
					self.stack.push(value);
				}
				Opcode::LocalSet => {
					let (index, _) = buf.read_u32_leb()?;
					let value = self.stack.pop_value()?;
					*locals
						.get_mut(index as usize)
						.ok_or(Trap::LocalIndexOutOfBounds(index))? = value;
				}
				Opcode::LocalTee => {
					let (index, _) = buf.read_u32_leb()?;
					let value = self.stack.pop_value()?;
					self.stack.push(value.clone());
					*locals
						.get_mut(index as usize)
						.ok_or(Trap::LocalIndexOutOfBounds(index))? = value;
				}
				Opcode::GlobalGet => {
					let (index, _) = buf.read_u32_leb()?;
					let value = self
						.instance
						.globals
						.get(index as usize)
						.ok_or(Trap::GlobalIndexOutOfBounds(index))?
						.clone();
					self.stack.push(value);
				}
				Opcode::GlobalSet => {
					let (index, _) = buf.read_u32_leb()?;
					let value = self.stack.pop_value()?;
					*self
						.instance
						.globals
						.get_mut(index as usize)
						.ok_or(Trap::GlobalIndexOutOfBounds(index))? = value;
				}
				// legal in the dialect table but outside the executable
				// subset, like the structured branches a rewritten body no
				// longer contains
				Opcode::TableGet
				| Opcode::TableSet
				| Opcode::If
				| Opcode::Else
				| Opcode::Br
				| Opcode::BrIf
				| Opcode::BrTable => return Err(Trap::IllegalBytecode(code)),
				Opcode::I32Load => {
					let addr = self.mem_addr(&mut buf, 4)?;
					let mut raw = [0u8; 4];
					raw.copy_from_slice(&self.instance.memory[addr..addr + 4]);
					self.stack.push(i32::from_le_bytes(raw));
				}
				Opcode::I32Load8S => {
					let addr = self.mem_addr(&mut buf, 1)?;
					self.stack.push(self.instance.memory[addr] as i8 as i32);
				}
				Opcode::I32Load8U => {
					let addr = self.mem_addr(&mut buf, 1)?;
					self.stack.push(self.instance.memory[addr] as i32);
				}
				Opcode::I32Load16S => {
					let addr = self.mem_addr(&mut buf, 2)?;
					let mut raw = [0u8; 2];
					raw.copy_from_slice(&self.instance.memory[addr..addr + 2]);
					self.stack.push(i16::from_le_bytes(raw) as i32);
				}
				Opcode::I32Load16U => {
					let addr = self.mem_addr(&mut buf, 2)?;
					let mut raw = [0u8; 2];
					raw.copy_from_slice(&self.instance.memory[addr..addr + 2]);
					self.stack.push(u16::from_le_bytes(raw) as i32);
				}
				Opcode::F64Load => {
					let addr = self.mem_addr(&mut buf, 8)?;
					let mut raw = [0u8; 8];
					raw.copy_from_slice(&self.instance.memory[addr..addr + 8]);
					self.stack.push(f64::from_le_bytes(raw));
				}
				Opcode::I32Store => {
					let value: i32 = self.stack.pop()?;
					let addr = self.mem_addr(&mut buf, 4)?;
					self.instance.memory[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
				}
				Opcode::I32Store8 => {
					let value: i32 = self.stack.pop()?;
					let addr = self.mem_addr(&mut buf, 1)?;
					self.instance.memory[addr] = value as u8;
				}
				Opcode::I32Store16 => {
					let value: i32 = self.stack.pop()?;
					let addr = self.mem_addr(&mut buf, 2)?;
					self.instance.memory[addr..addr + 2]
						.copy_from_slice(&(value as u16).to_le_bytes());
				}
				Opcode::F64Store => {
					let value: f64 = self.stack.pop()?;
					let addr = self.mem_addr(&mut buf, 8)?;
					self.instance.memory[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
				}
				Opcode::I32Const => {
					let (value, _) = buf.read_i32_leb()?;
					self.stack.push(value);
				}
				Opcode::F64Const => {
					let value = buf.read_f64_le()?;
					self.stack.push(value);
				}
				Opcode::I32Eqz => {
					let value: i32 = self.stack.pop()?;
					self.stack.push((value == 0) as i32);
				}
				Opcode::I32Eq => self.i32_cmp(|a, b| a == b)?,
				Opcode::I32Ne => self.i32_cmp(|a, b| a != b)?,
				Opcode::I32LtS => self.i32_cmp(|a, b| a < b)?,
				Opcode::I32LtU => self.i32_cmp(|a, b| (a as u32) < (b as u32))?,
				Opcode::I32GtS => self.i32_cmp(|a, b| a > b)?,
				Opcode::I32GtU => self.i32_cmp(|a, b| (a as u32) > (b as u32))?,
				Opcode::I32LeS => self.i32_cmp(|a, b| a <= b)?,
				Opcode::I32LeU => self.i32_cmp(|a, b| (a as u32) <= (b as u32))?,
				Opcode::I32GeS => self.i32_cmp(|a, b| a >= b)?,
				Opcode::I32GeU => self.i32_cmp(|a, b| (a as u32) >= (b as u32))?,
				Opcode::F64Eq => self.f64_cmp(|a, b| a == b)?,
				Opcode::F64Ne => self.f64_cmp(|a, b| a != b)?,
				Opcode::F64Lt => self.f64_cmp(|a, b| a < b)?,
				Opcode::F64Gt => self.f64_cmp(|a, b| a > b)?,
				Opcode::F64Le => self.f64_cmp(|a, b| a <= b)?,
				Opcode::F64Ge => self.f64_cmp(|a, b| a >= b)?,
				Opcode::I32Clz => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value.leading_zeros() as i32);
				}
				Opcode::I32Ctz => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value.trailing_zeros() as i32);
				}
				Opcode::I32Popcnt => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value.count_ones() as i32);
				}
				Opcode::I32Add => self.i32_binop(|a, b| a.wrapping_add(b))?,
				Opcode::I32Sub => self.i32_binop(|a, b| a.wrapping_sub(b))?,
				Opcode::I32Mul => self.i32_binop(|a, b| a.wrapping_mul(b))?,
				Opcode::I32DivS => {
					let b: i32 = self.stack.pop()?;
					let a: i32 = self.stack.pop()?;
					if b == 0 {
						return Err(Trap::DivisionByZero);
					}
					let value = a.checked_div(b).ok_or(Trap::IntegerOverflow)?;
					self.stack.push(value);
				}
				Opcode::I32DivU => {
					let b: u32 = self.stack.pop()?;
					let a: u32 = self.stack.pop()?;
					if b == 0 {
						return Err(Trap::DivisionByZero);
					}
					self.stack.push(a / b);
				}
				Opcode::I32RemS => {
					let b: i32 = self.stack.pop()?;
					let a: i32 = self.stack.pop()?;
					if b == 0 {
						return Err(Trap::DivisionByZero);
					}
					self.stack.push(a.wrapping_rem(b));
				}
				Opcode::I32RemU => {
					let b: u32 = self.stack.pop()?;
					let a: u32 = self.stack.pop()?;
					if b == 0 {
						return Err(Trap::DivisionByZero);
					}
					self.stack.push(a % b);
				}
				Opcode::I32And => self.i32_binop(|a, b| a & b)?,
				Opcode::I32Or => self.i32_binop(|a, b| a | b)?,
				Opcode::I32Xor => self.i32_binop(|a, b| a ^ b)?,
				Opcode::I32Shl => self.i32_binop(|a, b| a.wrapping_shl(b as u32))?,
				Opcode::I32ShrS => self.i32_binop(|a, b| a.wrapping_shr(b as u32))?,
				Opcode::I32ShrU => self.i32_binop(|a, b| ((a as u32).wrapping_shr(b as u32)) as i32)?,
				Opcode::I32Rotl => self.i32_binop(|a, b| a.rotate_left(b as u32))?,
				Opcode::I32Rotr => self.i32_binop(|a, b| a.rotate_right(b as u32))?,
				Opcode::F64Add => self.f64_binop(|a, b| a + b)?,
				Opcode::F64Sub => self.f64_binop(|a, b| a - b)?,
				Opcode::F64Mul => self.f64_binop(|a, b| a * b)?,
				Opcode::F64Div => self.f64_binop(|a, b| a / b)?,
				Opcode::I32TruncF64S => {
					let value: f64 = self.stack.pop()?;
					if value.is_nan() {
						return Err(Trap::InvalidConversionToInteger);
					}
					let truncated = value.trunc();
					if !(-2_147_483_648.0..=2_147_483_647.0).contains(&truncated) {
						return Err(Trap::IntegerOverflow);
					}
					self.stack.push(truncated as i32);
				}
				Opcode::I32TruncF64U => {
					let value: f64 = self.stack.pop()?;
					if value.is_nan() {
						return Err(Trap::InvalidConversionToInteger);
					}
					let truncated = value.trunc();
					if !(0.0..=4_294_967_295.0).contains(&truncated) {
						return Err(Trap::IntegerOverflow);
					}
					self.stack.push(truncated as u32);
				}
				Opcode::F64ConvertI32S => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value as f64);
				}
				Opcode::F64ConvertI32U => {
					let value: u32 = self.stack.pop()?;
					self.stack.push(value as f64);
				}
				Opcode::I32Extend8S => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value as i8 as i32);
				}
				Opcode::I32Extend16S => {
					let value: i32 = self.stack.pop()?;
					self.stack.push(value as i16 as i32);
				}
			}
			pc = buf.pos();
		}
		Ok(())
	}

	/// Reads a memarg, pops the base address and bounds-checks the access.
	fn mem_addr(&mut self, buf: &mut WasmBuffer, access_size: usize) -> Result<usize, Trap> {
		let _align = buf.read_u8()?;
		let (offset, _) = buf.read_u32_leb()?;
		let base: u32 = self.stack.pop()?;
		let addr = base as usize + offset as usize;
		if addr + access_size > self.instance.memory.len() {
			return Err(Trap::MemoryOutOfBounds { addr });
		}
		Ok(addr)
	}

	fn i32_binop(&mut self, op: impl FnOnce(i32, i32) -> i32) -> Result<(), Trap> {
		let b: i32 = self.stack.pop()?;
		let a: i32 = self.stack.pop()?;
		self.stack.push(op(a, b));
		Ok(())
	}

	fn i32_cmp(&mut self, op: impl FnOnce(i32, i32) -> bool) -> Result<(), Trap> {
		let b: i32 = self.stack.pop()?;
		let a: i32 = self.stack.pop()?;
		self.stack.push(op(a, b) as i32);
		Ok(())
	}

	fn f64_binop(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), Trap> {
		let b: f64 = self.stack.pop()?;
		let a: f64 = self.stack.pop()?;
		self.stack.push(op(a, b));
		Ok(())
	}

	fn f64_cmp(&mut self, op: impl FnOnce(f64, f64) -> bool) -> Result<(), Trap> {
		let b: f64 = self.stack.pop()?;
		let a: f64 = self.stack.pop()?;
		self.stack.push(op(a, b) as i32);
		Ok(())
	}
}

fn jump_target(imm_pos: usize, delta: i32) -> Result<usize, Trap> {
	let target = imm_pos as i64 + i64::from(delta);
	if target < 0 {
		return Err(Trap::JumpOutOfBounds);
	}
	Ok(target as usize)
}
