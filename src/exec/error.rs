use crate::bytecode::BufferError;
use thiserror::Error;

/// A runtime trap. Any of these aborts execution; the runner reports them
/// all as `!trap`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Trap {
	#[error("unreachable executed")]
	Unreachable,

	#[error("division by zero")]
	DivisionByZero,

	#[error("integer overflow")]
	IntegerOverflow,

	#[error("invalid conversion to integer")]
	InvalidConversionToInteger,

	#[error("out-of-bounds memory access at address {addr}")]
	MemoryOutOfBounds { addr: usize },

	#[error("out-of-bounds table access at index {index}")]
	TableOutOfBounds { index: u32 },

	#[error("uninitialized table element {index}")]
	UninitializedElement { index: u32 },

	#[error("indirect call type mismatch")]
	IndirectCallTypeMismatch,

	#[error("function index {index} out of bounds for length {len}")]
	FunctionIndexOutOfBounds { index: u32, len: usize },

	#[error("signature index {0} out of bounds")]
	SignatureOutOfBounds(u32),

	#[error("local index {0} out of bounds")]
	LocalIndexOutOfBounds(u32),

	#[error("global index {0} out of bounds")]
	GlobalIndexOutOfBounds(u32),

	#[error("pop on an empty operand stack")]
	StackUnderflow,

	#[error("expected {expected} on the stack, got {got}")]
	StackTypeMismatch {
		expected: &'static str,
		got: &'static str,
	},

	#[error("call stack exhausted")]
	CallStackExhausted,

	#[error("illegal bytecode {0:#04x} reached")]
	IllegalBytecode(u8),

	#[error("jump target out of bounds")]
	JumpOutOfBounds,

	#[error("module has no \"main\" export")]
	NoMainFunction,

	#[error("malformed bytecode: {0}")]
	Bytecode(#[from] BufferError),
}
