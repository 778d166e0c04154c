// Low-level bytecode access: the byte cursor, the opcode metadata table,
// and the disassembler / instruction skipper built on them.

mod buffer;
mod disass;
mod error;
pub mod opcode;

pub use buffer::{encode_i32_leb4, encode_u32_leb4, encode_u32_leb5, WasmBuffer};
pub use disass::{
	import_kind_name, print_data, section_name, skip_insn, skip_local_decls, type_name,
	Disassembler,
};
pub use error::BufferError;
pub use opcode::{Imm, OpEntry, Opcode};
