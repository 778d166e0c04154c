use crate::exec::{Intrinsic, Value};
use crate::parse::{ParseError, Parser};
use crate::Config;
use num_enum::TryFromPrimitive;
use std::ops::Range;

/// <https://webassembly.github.io/spec/core/binary/modules.html#sections>
#[derive(Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionId {
	Custom = 0,
	Type = 1,
	Import = 2,
	Function = 3,
	Table = 4,
	Memory = 5,
	Global = 6,
	Export = 7,
	Start = 8,
	Element = 9,
	Code = 10,
	Data = 11,
}

/// <https://webassembly.github.io/spec/core/binary/types.html>
#[derive(Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum ValType {
	I32 = 0x7F,
	I64 = 0x7E,
	F32 = 0x7D,
	F64 = 0x7C,
	V128 = 0x7B,
	FuncRef = 0x70,
	ExternRef = 0x6F,
}

impl ValType {
	/// The dialect only values i32, f64 and externref.
	pub fn is_legal(self) -> bool {
		matches!(self, ValType::I32 | ValType::F64 | ValType::ExternRef)
	}
}

/// Import and export kinds share the same encoding.
///
/// <https://webassembly.github.io/spec/core/binary/modules.html#import-section>
#[derive(Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum ImportKind {
	Func = 0,
	Table = 1,
	Memory = 2,
	Global = 3,
}

/// Minimum and optional maximum count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
	pub initial: u32,
	pub max: Option<u32>,
}

/// A function signature. The dialect allows at most one result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
	pub params: Vec<ValType>,
	pub results: Vec<ValType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
	pub module: String,
	pub member: String,
	pub kind: ImportKind,
	/// Index into the function namespace.
	pub index: u32,
}

/// A declared function. Imported functions carry an intrinsic binding and an
/// empty code range; the code range of local functions covers the
/// instruction stream only, after the locals prologue.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
	pub sig_index: u32,
	pub intrinsic: Option<Intrinsic>,
	pub locals: Vec<ValType>,
	pub code: Range<usize>,
}

impl FuncDecl {
	pub fn is_import(&self) -> bool {
		self.intrinsic.is_some()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDecl {
	pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
	pub val_type: ValType,
	pub mutable: bool,
	pub init: Value,
}

/// A data segment: destination offset in linear memory and the byte range of
/// the payload within the module bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
	pub mem_offset: u32,
	pub bytes: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElemSegment {
	pub table_offset: u32,
	pub func_indices: Vec<u32>,
}

/// A parsed weewasm module.
///
/// The module owns the raw bytes it was parsed from; function code and data
/// segments are ranges into those bytes rather than copies, which is what
/// lets the branch rewriter patch code in place without invalidating any
/// offsets.
#[derive(Debug, Default)]
pub struct Module {
	pub bytes: Vec<u8>,
	pub signatures: Vec<Signature>,
	pub imports: Vec<Import>,
	pub funcs: Vec<FuncDecl>,
	pub table: Option<TableDecl>,
	pub memory: Option<Limits>,
	pub globals: Vec<GlobalDecl>,
	pub data: Vec<DataSegment>,
	pub elems: Vec<ElemSegment>,
	pub start_func: Option<u32>,
	pub main_func: Option<u32>,
}

impl Module {
	/// Parses `bytes` into a [Module] or a [ParseError].
	pub fn parse(bytes: Vec<u8>) -> Result<Module, ParseError> {
		Self::parse_with_config(bytes, &Config::default())
	}

	pub fn parse_with_config(bytes: Vec<u8>, config: &Config) -> Result<Module, ParseError> {
		let mut module = Module::default();
		Parser::run(&bytes, &mut module, config)?;
		module.bytes = bytes;
		Ok(module)
	}

	pub fn num_imports(&self) -> usize {
		self.imports.len()
	}

	/// The instruction stream of a local function.
	pub fn body(&self, func: &FuncDecl) -> &[u8] {
		&self.bytes[func.code.clone()]
	}
}
