use thiserror::Error;

/// Errors produced by [`WasmBuffer`](crate::bytecode::WasmBuffer) reads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
	#[error("unexpected end of module bytes at offset {at}")]
	UnexpectedEnd { at: usize },

	#[error("LEB128 at offset {at} is too long or out of range")]
	LebOverflow { at: usize },
}
