use crate::bytecode::BufferError;
use crate::parse::types::*;
use num_enum::TryFromPrimitiveError;
use std::string;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
	#[error("the module does not start with the magic constant 0x00 0x61 0x73 0x6D")]
	InvalidMagic,

	#[error("invalid Wasm version {0:#010x}, expected 1")]
	InvalidVersion(u32),

	#[error("unknown section id: {0}")]
	UnknownSectionId(#[from] TryFromPrimitiveError<SectionId>),

	#[error("repeated {0:?} section")]
	RepeatedSection(SectionId),

	#[error("{0:?} section out of order")]
	SectionOutOfOrder(SectionId),

	#[error("section length overruns the module: section end {section_end}, module size {module_len}")]
	SectionLengthOverrun { section_end: usize, module_len: usize },

	#[error("{id:?} section handler stopped at offset {pos}, expected {section_end}")]
	SectionEndMismatch { id: SectionId, pos: usize, section_end: usize },

	#[error("expected count <= {max} for {section} section, got {count}")]
	CountTooLarge { section: &'static str, count: u32, max: u32 },

	#[error("unknown type: {0}")]
	UnknownType(#[from] TryFromPrimitiveError<ValType>),

	#[error("illegal value type {0:?}")]
	IllegalValueType(ValType),

	#[error("expected signature declaration (0x60), got {0:#04x}")]
	ExpectedSignature(u8),

	#[error("expected result count <= 1, got {0}")]
	MultipleResults(u32),

	#[error("signature index {0} out of bounds")]
	SignatureIndexOutOfBounds(u32),

	#[error("function index {0} out of bounds")]
	FunctionIndexOutOfBounds(u32),

	#[error("unknown import kind: {0}")]
	UnknownImportKind(#[from] TryFromPrimitiveError<ImportKind>),

	#[error("illegal {0:?} import, only functions may be imported")]
	IllegalImport(ImportKind),

	#[error("unrecognized import module: {0}")]
	UnknownImportModule(String),

	#[error("unrecognized weewasm import: {0}")]
	UnknownImportMember(String),

	#[error("invalid table type, expected funcref")]
	InvalidTableType,

	#[error("expected exactly one entry in the {0} section")]
	ExpectedSingleEntry(&'static str),

	#[error("expected export name \"main\", got {0:?}")]
	ExportNotMain(String),

	#[error("illegal {0:?} export, only a function may be exported")]
	IllegalExport(ImportKind),

	#[error("illegal init expr bytecode {0:#04x}")]
	IllegalInitExpr(u8),

	#[error("invalid element flags {0}")]
	InvalidElemFlags(u32),

	#[error("invalid data flags {0}")]
	InvalidDataFlags(u32),

	#[error("expected {expected} function bodies, got {got}")]
	WrongBodyCount { expected: u32, got: u32 },

	#[error("code body of function {func_index} overruns its section")]
	BodyOverrun { func_index: u32 },

	#[error("name or data payload overruns its section")]
	PayloadOverrun,

	#[error(transparent)]
	Buffer(#[from] BufferError),

	#[error("invalid UTF-8 in name: {0}")]
	Utf8(#[from] string::FromUtf8Error),
}
