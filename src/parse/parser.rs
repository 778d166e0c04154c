use crate::bytecode::{self, Disassembler, Opcode, WasmBuffer};
use crate::exec::{Intrinsic, Value};
use crate::parse::error::ParseError;
use crate::parse::types::*;
use crate::Config;
use std::iter;
use tracing::trace;

const WASM_MAGIC: u32 = 0x6D73_6100;
const WASM_VERSION: u32 = 1;

/// Most counted sections share one generous entry cap.
const MAX_ENTRIES: u32 = 100_000;
const MAX_IMPORTS: u32 = 1000;

pub struct Parser<'b, 'm> {
	buf: WasmBuffer<'b>,
	module: &'m mut Module,
	config: &'m Config,
	/// Id of the last non-custom section, for ordering and dedup checks.
	last_section: Option<u8>,
}

impl<'b, 'm> Parser<'b, 'm> {
	/// Parses `bytes` into `module`. The caller hands the byte buffer to the
	/// module afterwards; all recorded ranges index into it.
	pub(crate) fn run(
		bytes: &'b [u8],
		module: &'m mut Module,
		config: &'m Config,
	) -> Result<(), ParseError> {
		let mut parser = Parser {
			buf: WasmBuffer::new(bytes),
			module,
			config,
			last_section: None,
		};
		parser.parse_module()
	}

	fn parse_module(&mut self) -> Result<(), ParseError> {
		let magic = self.buf.read_u32_le()?;
		if magic != WASM_MAGIC {
			return Err(ParseError::InvalidMagic);
		}
		let version = self.buf.read_u32_le()?;
		if version != WASM_VERSION {
			return Err(ParseError::InvalidVersion(version));
		}

		while !self.buf.is_at_end() {
			self.parse_section()?;
		}
		Ok(())
	}

	fn parse_section(&mut self) -> Result<(), ParseError> {
		let id_byte = self.buf.read_u8()?;
		let (length, _) = self.buf.read_u32_leb()?;
		let section_end = self.buf.pos() + length as usize;
		if section_end > self.buf.len() {
			return Err(ParseError::SectionLengthOverrun {
				section_end,
				module_len: self.buf.len(),
			});
		}

		if id_byte == SectionId::Custom as u8 {
			let name = self.read_string(section_end)?;
			trace!("skipping custom section {:?} ({} bytes)", name, length);
			self.buf.set_pos(section_end);
			return Ok(());
		}

		let id = SectionId::try_from(id_byte)?;
		if let Some(last) = self.last_section {
			if id_byte == last {
				return Err(ParseError::RepeatedSection(id));
			}
			if id_byte < last {
				return Err(ParseError::SectionOutOfOrder(id));
			}
		}
		self.last_section = Some(id_byte);

		trace!("parsing {:?} section, {} bytes", id, length);
		if self.config.disassemble {
			println!("{} section, {} bytes", bytecode::section_name(id_byte), length);
		}

		match id {
			SectionId::Type => self.parse_type_section()?,
			SectionId::Import => self.parse_import_section(section_end)?,
			SectionId::Function => self.parse_function_section()?,
			SectionId::Table => self.parse_table_section()?,
			SectionId::Memory => self.parse_memory_section()?,
			SectionId::Global => self.parse_global_section()?,
			SectionId::Export => self.parse_export_section(section_end)?,
			SectionId::Start => self.parse_start_section()?,
			SectionId::Element => self.parse_element_section()?,
			SectionId::Code => self.parse_code_section(section_end)?,
			SectionId::Data => self.parse_data_section(section_end)?,
			SectionId::Custom => {}
		}

		// internal check: every handler must consume its section exactly
		if self.buf.pos() != section_end {
			return Err(ParseError::SectionEndMismatch {
				id,
				pos: self.buf.pos(),
				section_end,
			});
		}
		Ok(())
	}

	fn read_count(&mut self, section: &'static str, max: u32) -> Result<u32, ParseError> {
		let (count, _) = self.buf.read_u32_leb()?;
		if count > max {
			return Err(ParseError::CountTooLarge { section, count, max });
		}
		Ok(count)
	}

	fn read_string(&mut self, section_end: usize) -> Result<String, ParseError> {
		let (length, _) = self.buf.read_u32_leb()?;
		if self.buf.pos() + length as usize > section_end {
			return Err(ParseError::PayloadOverrun);
		}
		let bytes = self.buf.read_bytes(length as usize)?;
		Ok(String::from_utf8(bytes.to_vec())?)
	}

	fn read_value_type(&mut self) -> Result<ValType, ParseError> {
		let val_type = ValType::try_from(self.buf.read_u8()?)?;
		if !val_type.is_legal() {
			return Err(ParseError::IllegalValueType(val_type));
		}
		Ok(val_type)
	}

	fn read_limits(&mut self) -> Result<Limits, ParseError> {
		let flags = self.buf.read_u8()?;
		let (initial, _) = self.buf.read_u32_leb()?;
		let max = if flags & 1 == 1 {
			Some(self.buf.read_u32_leb()?.0)
		} else {
			None
		};
		Ok(Limits { initial, max })
	}

	/// A global initializer: exactly one `i32.const` or `f64.const`, then `end`.
	fn read_init_expr(&mut self) -> Result<Value, ParseError> {
		let opcode = self.buf.read_u8()?;
		let value = match Opcode::try_from(opcode) {
			Ok(Opcode::I32Const) => Value::I32(self.buf.read_i32_leb()?.0),
			Ok(Opcode::F64Const) => Value::F64(self.buf.read_f64_le()?),
			_ => return Err(ParseError::IllegalInitExpr(opcode)),
		};
		let end = self.buf.read_u8()?;
		if end != Opcode::End as u8 {
			return Err(ParseError::IllegalInitExpr(end));
		}
		Ok(value)
	}

	/// A data or element offset: exactly one `i32.const`, then `end`.
	fn read_offset_expr(&mut self) -> Result<u32, ParseError> {
		let opcode = self.buf.read_u8()?;
		if opcode != Opcode::I32Const as u8 {
			return Err(ParseError::IllegalInitExpr(opcode));
		}
		let (value, _) = self.buf.read_i32_leb()?;
		let end = self.buf.read_u8()?;
		if end != Opcode::End as u8 {
			return Err(ParseError::IllegalInitExpr(end));
		}
		Ok(value as u32)
	}

	fn check_sig_index(&self, sig_index: u32) -> Result<(), ParseError> {
		if (sig_index as usize) < self.module.signatures.len() {
			Ok(())
		} else {
			Err(ParseError::SignatureIndexOutOfBounds(sig_index))
		}
	}

	fn check_func_index(&self, func_index: u32) -> Result<(), ParseError> {
		if (func_index as usize) < self.module.funcs.len() {
			Ok(())
		} else {
			Err(ParseError::FunctionIndexOutOfBounds(func_index))
		}
	}

	fn parse_signature(&mut self) -> Result<Signature, ParseError> {
		let tag = self.buf.read_u8()?;
		if tag != 0x60 {
			return Err(ParseError::ExpectedSignature(tag));
		}
		let mut signature = Signature::default();
		let (num_params, _) = self.buf.read_u32_leb()?;
		for _ in 0..num_params {
			signature.params.push(self.read_value_type()?);
		}
		let (num_results, _) = self.buf.read_u32_leb()?;
		if num_results > 1 {
			return Err(ParseError::MultipleResults(num_results));
		}
		for _ in 0..num_results {
			signature.results.push(self.read_value_type()?);
		}
		Ok(signature)
	}

	fn parse_type_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("type", MAX_ENTRIES)?;
		trace!("parsing type section with {} signatures", count);
		for _ in 0..count {
			let signature = self.parse_signature()?;
			trace!("{:?}", signature);
			self.module.signatures.push(signature);
		}
		Ok(())
	}

	fn parse_import_section(&mut self, section_end: usize) -> Result<(), ParseError> {
		let count = self.read_count("import", MAX_IMPORTS)?;
		trace!("parsing import section with {} imports", count);
		for _ in 0..count {
			let module_name = self.read_string(section_end)?;
			let member = self.read_string(section_end)?;
			let kind = ImportKind::try_from(self.buf.read_u8()?)?;
			if kind != ImportKind::Func {
				return Err(ParseError::IllegalImport(kind));
			}
			let (sig_index, _) = self.buf.read_u32_leb()?;
			self.check_sig_index(sig_index)?;
			if module_name != "weewasm" {
				return Err(ParseError::UnknownImportModule(module_name));
			}
			let intrinsic = Intrinsic::by_name(&member)
				.ok_or_else(|| ParseError::UnknownImportMember(member.clone()))?;
			trace!("import {}.{} bound to {:?}", module_name, member, intrinsic);
			let func_index = self.module.funcs.len() as u32;
			self.module.imports.push(Import {
				module: module_name,
				member,
				kind,
				index: func_index,
			});
			self.module.funcs.push(FuncDecl {
				sig_index,
				intrinsic: Some(intrinsic),
				locals: Vec::new(),
				code: 0..0,
			});
		}
		Ok(())
	}

	fn parse_function_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("function", MAX_ENTRIES)?;
		trace!("parsing function section with {} functions", count);
		for _ in 0..count {
			let (sig_index, _) = self.buf.read_u32_leb()?;
			self.check_sig_index(sig_index)?;
			self.module.funcs.push(FuncDecl {
				sig_index,
				intrinsic: None,
				locals: Vec::new(),
				code: 0..0,
			});
		}
		Ok(())
	}

	fn parse_table_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("table", 1)?;
		if count != 1 {
			return Err(ParseError::ExpectedSingleEntry("table"));
		}
		let elem_type = ValType::try_from(self.buf.read_u8()?)?;
		if elem_type != ValType::FuncRef {
			return Err(ParseError::InvalidTableType);
		}
		let limits = self.read_limits()?;
		trace!("table with limits {:?}", limits);
		self.module.table = Some(TableDecl { limits });
		Ok(())
	}

	fn parse_memory_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("memory", 1)?;
		if count != 1 {
			return Err(ParseError::ExpectedSingleEntry("memory"));
		}
		let limits = self.read_limits()?;
		trace!("memory with limits {:?}", limits);
		self.module.memory = Some(limits);
		Ok(())
	}

	fn parse_global_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("global", MAX_ENTRIES)?;
		trace!("parsing global section with {} globals", count);
		for _ in 0..count {
			let val_type = self.read_value_type()?;
			let mutable = self.buf.read_u8()? != 0;
			let init = self.read_init_expr()?;
			self.module.globals.push(GlobalDecl {
				val_type,
				mutable,
				init,
			});
		}
		Ok(())
	}

	fn parse_export_section(&mut self, section_end: usize) -> Result<(), ParseError> {
		let count = self.read_count("export", 1)?;
		if count != 1 {
			return Err(ParseError::ExpectedSingleEntry("export"));
		}
		let name = self.read_string(section_end)?;
		if name != "main" {
			return Err(ParseError::ExportNotMain(name));
		}
		let kind = ImportKind::try_from(self.buf.read_u8()?)?;
		let (index, _) = self.buf.read_u32_leb()?;
		if kind != ImportKind::Func {
			return Err(ParseError::IllegalExport(kind));
		}
		self.check_func_index(index)?;
		self.module.main_func = Some(index);
		Ok(())
	}

	fn parse_start_section(&mut self) -> Result<(), ParseError> {
		let (index, _) = self.buf.read_u32_leb()?;
		self.check_func_index(index)?;
		self.module.start_func = Some(index);
		Ok(())
	}

	fn parse_element_section(&mut self) -> Result<(), ParseError> {
		let count = self.read_count("element", MAX_ENTRIES)?;
		trace!("parsing element section with {} segments", count);
		for _ in 0..count {
			let (flags, _) = self.buf.read_u32_leb()?;
			if flags != 0 {
				return Err(ParseError::InvalidElemFlags(flags));
			}
			let table_offset = self.read_offset_expr()?;
			let (num_funcs, _) = self.buf.read_u32_leb()?;
			let mut func_indices = Vec::new();
			for _ in 0..num_funcs {
				let (func_index, _) = self.buf.read_u32_leb()?;
				self.check_func_index(func_index)?;
				func_indices.push(func_index);
			}
			self.module.elems.push(ElemSegment {
				table_offset,
				func_indices,
			});
		}
		Ok(())
	}

	fn parse_locals(&mut self) -> Result<Vec<ValType>, ParseError> {
		let mut locals = Vec::new();
		let (decl_count, _) = self.buf.read_u32_leb()?;
		for _ in 0..decl_count {
			let (repeat, _) = self.buf.read_u32_leb()?;
			let val_type = self.read_value_type()?;
			if locals.len() + repeat as usize > MAX_ENTRIES as usize {
				return Err(ParseError::CountTooLarge {
					section: "code (locals)",
					count: repeat,
					max: MAX_ENTRIES,
				});
			}
			locals.extend(iter::repeat(val_type).take(repeat as usize));
		}
		Ok(locals)
	}

	fn parse_code_section(&mut self, section_end: usize) -> Result<(), ParseError> {
		let num_imports = self.module.num_imports();
		let expected = (self.module.funcs.len() - num_imports) as u32;
		let count = self.read_count("code", MAX_ENTRIES)?;
		if count != expected {
			return Err(ParseError::WrongBodyCount {
				expected,
				got: count,
			});
		}
		trace!("parsing code section with {} bodies", count);
		for i in 0..count as usize {
			let func_index = num_imports + i;
			let (body_len, _) = self.buf.read_u32_leb()?;
			let body_end = self.buf.pos() + body_len as usize;
			if body_end > section_end {
				return Err(ParseError::BodyOverrun {
					func_index: func_index as u32,
				});
			}
			let locals = self.parse_locals()?;
			let code_start = self.buf.pos();
			if code_start > body_end {
				return Err(ParseError::BodyOverrun {
					func_index: func_index as u32,
				});
			}
			if self.config.disassemble {
				println!("func #{func_index} body, {body_len} bytes");
				let mut disass = Disassembler::printer();
				while self.buf.pos() < body_end {
					disass.step(&mut self.buf)?;
				}
			}
			self.buf.set_pos(body_end);
			trace!("func #{} code at {}..{}", func_index, code_start, body_end);
			let func = &mut self.module.funcs[func_index];
			func.locals = locals;
			func.code = code_start..body_end;
		}
		Ok(())
	}

	fn parse_data_section(&mut self, section_end: usize) -> Result<(), ParseError> {
		let count = self.read_count("data", MAX_ENTRIES)?;
		trace!("parsing data section with {} segments", count);
		for _ in 0..count {
			let (flags, _) = self.buf.read_u32_leb()?;
			if flags != 0 {
				return Err(ParseError::InvalidDataFlags(flags));
			}
			let mem_offset = self.read_offset_expr()?;
			let (byte_count, _) = self.buf.read_u32_leb()?;
			if self.buf.pos() + byte_count as usize > section_end {
				return Err(ParseError::PayloadOverrun);
			}
			let bytes_start = self.buf.pos();
			if self.config.disassemble {
				bytecode::print_data(&mut self.buf, byte_count)?;
			} else {
				self.buf.read_bytes(byte_count as usize)?;
			}
			self.module.data.push(DataSegment {
				mem_offset,
				bytes: bytes_start..self.buf.pos(),
			});
		}
		Ok(())
	}
}
