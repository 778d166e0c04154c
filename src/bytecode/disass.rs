use crate::bytecode::error::BufferError;
use crate::bytecode::opcode::{self, Imm, Opcode};
use crate::bytecode::WasmBuffer;

/// Returns the name of a section id.
pub fn section_name(id: u8) -> &'static str {
	match id {
		0 => "custom",
		1 => "type",
		2 => "import",
		3 => "function",
		4 => "table",
		5 => "memory",
		6 => "global",
		7 => "export",
		8 => "start",
		9 => "element",
		10 => "code",
		11 => "data",
		_ => "unknown",
	}
}

/// Returns the name of a type code as it appears in a signed LEB.
pub fn type_name(code: i32) -> &'static str {
	match code {
		-1 => "i32",
		-2 => "<!illegal i64>",
		-3 => "<!illegal f32>",
		-4 => "f64",
		-5 => "<!illegal v128>",
		-16 => "funcref",
		-17 => "externref",
		_ => "<!unknown type>",
	}
}

/// Returns the name of an import or export kind byte.
pub fn import_kind_name(kind: u8) -> &'static str {
	match kind {
		0 => "func",
		1 => "table",
		2 => "memory",
		3 => "global",
		_ => "<!unknown import kind>",
	}
}

/// Steps over bytecode one instruction at a time, either printing each
/// instruction to stdout or advancing silently.
///
/// Both modes take identical byte-sized steps, so the rewriter can use the
/// silent mode to skip instructions it does not care about and trust its
/// stream position.
pub struct Disassembler {
	print: bool,
	indent: usize,
}

impl Disassembler {
	pub fn printer() -> Self {
		Disassembler { print: true, indent: 1 }
	}

	pub fn skipper() -> Self {
		Disassembler { print: false, indent: 0 }
	}

	/// Advances `buf` past exactly one instruction.
	pub fn step(&mut self, buf: &mut WasmBuffer) -> Result<(), BufferError> {
		let code = buf.read_u8()?;
		let entry = opcode::lookup(code);

		if self.print {
			if matches!(Opcode::try_from(code), Ok(Opcode::End) | Ok(Opcode::Else)) {
				self.indent = self.indent.saturating_sub(1);
			}
			for _ in 0..self.indent {
				print!("  ");
			}
			match entry {
				None => print!("<!illegal bytecode {code:02X}>"),
				Some(entry) if !entry.legal => print!("<!illegal {}>", entry.mnemonic),
				Some(entry) => print!("{}", entry.mnemonic),
			}
			if matches!(
				Opcode::try_from(code),
				Ok(Opcode::Block) | Ok(Opcode::Loop) | Ok(Opcode::If) | Ok(Opcode::Else)
			) {
				self.indent += 1;
			}
		}

		// An unknown byte carries no decodable immediates; stop after the
		// opcode itself, exactly like a known immediate-free instruction.
		let imm = entry.map(|entry| entry.imm).unwrap_or(Imm::None);
		match imm {
			Imm::None => {}
			Imm::Label
			| Imm::Func
			| Imm::Local
			| Imm::Global
			| Imm::Table
			| Imm::Memory
			| Imm::Tag
			| Imm::RefNullType => {
				let (index, _) = buf.read_u32_leb()?;
				self.out(format_args!(" {index}"));
			}
			Imm::BlockType => {
				let (block_type, _) = buf.read_i32_leb()?;
				if block_type != -64 {
					self.out(format_args!(" <!illegal blocktype {block_type}>"));
				}
			}
			Imm::Labels => {
				let (count, _) = buf.read_u32_leb()?;
				self.out(format_args!(" {count}"));
				for _ in 0..=count {
					let (label, _) = buf.read_u32_leb()?;
					self.out(format_args!(" {label}"));
				}
			}
			Imm::SigTable => {
				let (sig, _) = buf.read_u32_leb()?;
				self.out(format_args!(" {sig}"));
				let (table, _) = buf.read_u32_leb()?;
				if table != 0 {
					self.out(format_args!(" <!illegal table {table}>"));
				}
			}
			Imm::Memarg => {
				let _align = buf.read_u8()?;
				let (offset, _) = buf.read_u32_leb()?;
				self.out(format_args!(" {offset}"));
			}
			Imm::I32 => {
				let (value, _) = buf.read_i32_leb()?;
				self.out(format_args!(" {value}"));
			}
			Imm::I64 => {
				let (value, _) = buf.read_i64_leb()?;
				self.out(format_args!(" {value}"));
			}
			Imm::F32 => {
				for _ in 0..4 {
					let byte = buf.read_u8()?;
					self.out(format_args!(" {byte:02X}"));
				}
			}
			Imm::F64 => {
				let bits = buf.read_u64_le()?;
				self.out(format_args!("  {bits:016x}"));
			}
			Imm::ValTypes => {
				let (code, _) = buf.read_i32_leb()?;
				self.out(format_args!(" {}", type_name(code)));
			}
			Imm::PcDelta => {
				let (delta, _) = buf.read_i32_leb()?;
				self.out(format_args!(" {delta:+}"));
			}
			Imm::PcDeltas => {
				let (count, _) = buf.read_u32_leb()?;
				self.out(format_args!(" {count}"));
				for _ in 0..=count {
					let (delta, _) = buf.read_i32_leb()?;
					self.out(format_args!(" {delta:+}"));
				}
			}
		}
		if self.print {
			println!();
		}
		Ok(())
	}

	fn out(&self, args: std::fmt::Arguments) {
		if self.print {
			print!("{args}");
		}
	}
}

/// Advances `buf` past exactly one instruction without printing.
pub fn skip_insn(buf: &mut WasmBuffer) -> Result<(), BufferError> {
	Disassembler::skipper().step(buf)
}

/// Advances `buf` past the local declarations at the head of a function body.
pub fn skip_local_decls(buf: &mut WasmBuffer) -> Result<(), BufferError> {
	let (decl_count, _) = buf.read_u32_leb()?;
	for _ in 0..decl_count {
		let (_count, _) = buf.read_u32_leb()?;
		let (_type, _) = buf.read_i32_leb()?;
	}
	Ok(())
}

/// Prints `count` bytes as a hex dump, 16 per line.
pub fn print_data(buf: &mut WasmBuffer, count: u32) -> Result<(), BufferError> {
	println!();
	for i in 0..count {
		let byte = buf.read_u8()?;
		print!(" {byte:02X}");
		if i % 16 == 15 {
			println!();
		}
	}
	println!();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bytecode::encode_u32_leb4;

	#[test]
	fn skips_immediate_free_instruction() {
		let body = [0x6A, 0x0B]; // i32.add, end
		let mut buf = WasmBuffer::new(&body);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), 1);
	}

	#[test]
	fn skips_const_and_memarg_immediates() {
		let body = [
			0x41, 0xC0, 0xBB, 0x78, // i32.const -123456
			0x28, 0x02, 0x10, // i32.load align=2 offset=16
			0x44, 0, 0, 0, 0, 0, 0, 0xF0, 0x3F, // f64.const 1.0
		];
		let mut buf = WasmBuffer::new(&body);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), 4);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), 7);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), 16);
	}

	#[test]
	fn skips_padded_branch_table() {
		let mut body = vec![0x0E, 0x01]; // br_table with count 1
		body.extend_from_slice(&encode_u32_leb4(0));
		body.extend_from_slice(&encode_u32_leb4(1));
		let mut buf = WasmBuffer::new(&body);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), body.len());
	}

	#[test]
	fn unknown_byte_advances_one_byte() {
		let body = [0xFF, 0x01];
		let mut buf = WasmBuffer::new(&body);
		skip_insn(&mut buf).unwrap();
		assert_eq!(buf.pos(), 1);
	}

	#[test]
	fn local_decls_skipped() {
		let body = [
			0x02, // two declarations
			0x03, 0x7F, // 3 x i32
			0x01, 0x7C, // 1 x f64
			0x0B, // end
		];
		let mut buf = WasmBuffer::new(&body);
		skip_local_decls(&mut buf).unwrap();
		assert_eq!(buf.pos(), 5);
	}
}
