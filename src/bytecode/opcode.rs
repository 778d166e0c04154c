use num_enum::TryFromPrimitive;

/// Opcodes the toolchain handles by name: the weewasm dialect plus the three
/// post-rewrite jump opcodes.
///
/// <https://webassembly.github.io/spec/core/binary/instructions.html>
#[derive(Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
	Unreachable    = 0x00,
	Nop            = 0x01,
	Block          = 0x02,
	Loop           = 0x03,
	If             = 0x04,
	Else           = 0x05,
	End            = 0x0B,
	Br             = 0x0C,
	BrIf           = 0x0D,
	BrTable        = 0x0E,
	Return         = 0x0F,
	Call           = 0x10,
	CallIndirect   = 0x11,
	Drop           = 0x1A,
	Select         = 0x1B,
	LocalGet       = 0x20,
	LocalSet       = 0x21,
	LocalTee       = 0x22,
	GlobalGet      = 0x23,
	GlobalSet      = 0x24,
	TableGet       = 0x25,
	TableSet       = 0x26,
	I32Load        = 0x28,
	F64Load        = 0x2B,
	I32Load8S      = 0x2C,
	I32Load8U      = 0x2D,
	I32Load16S     = 0x2E,
	I32Load16U     = 0x2F,
	I32Store       = 0x36,
	F64Store       = 0x39,
	I32Store8      = 0x3A,
	I32Store16     = 0x3B,
	I32Const       = 0x41,
	F64Const       = 0x44,
	I32Eqz         = 0x45,
	I32Eq          = 0x46,
	I32Ne          = 0x47,
	I32LtS         = 0x48,
	I32LtU         = 0x49,
	I32GtS         = 0x4A,
	I32GtU         = 0x4B,
	I32LeS         = 0x4C,
	I32LeU         = 0x4D,
	I32GeS         = 0x4E,
	I32GeU         = 0x4F,
	F64Eq          = 0x61,
	F64Ne          = 0x62,
	F64Lt          = 0x63,
	F64Gt          = 0x64,
	F64Le          = 0x65,
	F64Ge          = 0x66,
	I32Clz         = 0x67,
	I32Ctz         = 0x68,
	I32Popcnt      = 0x69,
	I32Add         = 0x6A,
	I32Sub         = 0x6B,
	I32Mul         = 0x6C,
	I32DivS        = 0x6D,
	I32DivU        = 0x6E,
	I32RemS        = 0x6F,
	I32RemU        = 0x70,
	I32And         = 0x71,
	I32Or          = 0x72,
	I32Xor         = 0x73,
	I32Shl         = 0x74,
	I32ShrS        = 0x75,
	I32ShrU        = 0x76,
	I32Rotl        = 0x77,
	I32Rotr        = 0x78,
	F64Add         = 0xA0,
	F64Sub         = 0xA1,
	F64Mul         = 0xA2,
	F64Div         = 0xA3,
	I32TruncF64S   = 0xAA,
	I32TruncF64U   = 0xAB,
	F64ConvertI32S = 0xB7,
	F64ConvertI32U = 0xB8,
	I32Extend8S    = 0xC0,
	I32Extend16S   = 0xC1,
	Jmp            = 0xF0,
	JmpIf          = 0xF1,
	JmpTable       = 0xF2,
}

/// How the bytes following an opcode are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
	/// No immediate bytes.
	None,
	/// One signed LEB, which the dialect requires to equal -64 (empty block type).
	BlockType,
	/// One unsigned LEB branch depth.
	Label,
	/// Count LEB, then `count + 1` unsigned LEB branch depths.
	Labels,
	/// One unsigned LEB index.
	Func,
	Local,
	Global,
	Table,
	Memory,
	Tag,
	RefNullType,
	/// Signature index LEB, then a table index LEB that must be 0.
	SigTable,
	/// Alignment byte, then an offset LEB.
	Memarg,
	/// Signed LEB.
	I32,
	/// Signed LEB (never legal in the dialect).
	I64,
	/// Four raw bytes (never legal).
	F32,
	/// Eight little-endian bytes.
	F64,
	/// One signed LEB type code.
	ValTypes,
	/// Signed 4-byte LEB PC delta (post-rewrite `jmp`, `jmp_if`).
	PcDelta,
	/// Count LEB, then `count + 1` signed 4-byte LEB PC deltas (`jmp_table`).
	PcDeltas,
}

/// One row of the 256-entry opcode metadata table.
#[derive(Debug, Clone, Copy)]
pub struct OpEntry {
	pub mnemonic: &'static str,
	pub imm: Imm,
	pub legal: bool,
}

const UNKNOWN: OpEntry = OpEntry { mnemonic: "", imm: Imm::None, legal: false };

const fn legal(mnemonic: &'static str, imm: Imm) -> OpEntry {
	OpEntry { mnemonic, imm, legal: true }
}

const fn illegal(mnemonic: &'static str, imm: Imm) -> OpEntry {
	OpEntry { mnemonic, imm, legal: false }
}

static OPCODE_TABLE: [OpEntry; 256] = {
	let mut t = [UNKNOWN; 256];
	t[Opcode::Unreachable as usize]    = legal("unreachable", Imm::None);
	t[Opcode::Nop as usize]            = legal("nop", Imm::None);
	t[Opcode::Block as usize]          = legal("block", Imm::BlockType);
	t[Opcode::Loop as usize]           = legal("loop", Imm::BlockType);
	t[Opcode::If as usize]             = legal("if", Imm::BlockType);
	t[Opcode::Else as usize]           = legal("else", Imm::None);
	t[Opcode::End as usize]            = legal("end", Imm::None);
	t[Opcode::Br as usize]             = legal("br", Imm::Label);
	t[Opcode::BrIf as usize]           = legal("br_if", Imm::Label);
	t[Opcode::BrTable as usize]        = legal("br_table", Imm::Labels);
	t[Opcode::Return as usize]         = legal("return", Imm::None);
	t[Opcode::Call as usize]           = legal("call", Imm::Func);
	t[Opcode::CallIndirect as usize]   = legal("call_indirect", Imm::SigTable);
	t[Opcode::Drop as usize]           = legal("drop", Imm::None);
	t[Opcode::Select as usize]         = legal("select", Imm::None);
	t[Opcode::LocalGet as usize]       = legal("local.get", Imm::Local);
	t[Opcode::LocalSet as usize]       = legal("local.set", Imm::Local);
	t[Opcode::LocalTee as usize]       = legal("local.tee", Imm::Local);
	t[Opcode::GlobalGet as usize]      = legal("global.get", Imm::Global);
	t[Opcode::GlobalSet as usize]      = legal("global.set", Imm::Global);
	t[Opcode::TableGet as usize]       = legal("table.get", Imm::Table);
	t[Opcode::TableSet as usize]       = legal("table.set", Imm::Table);
	t[Opcode::I32Load as usize]        = legal("i32.load", Imm::Memarg);
	t[Opcode::F64Load as usize]        = legal("f64.load", Imm::Memarg);
	t[Opcode::I32Load8S as usize]      = legal("i32.load8_s", Imm::Memarg);
	t[Opcode::I32Load8U as usize]      = legal("i32.load8_u", Imm::Memarg);
	t[Opcode::I32Load16S as usize]     = legal("i32.load16_s", Imm::Memarg);
	t[Opcode::I32Load16U as usize]     = legal("i32.load16_u", Imm::Memarg);
	t[Opcode::I32Store as usize]       = legal("i32.store", Imm::Memarg);
	t[Opcode::F64Store as usize]       = legal("f64.store", Imm::Memarg);
	t[Opcode::I32Store8 as usize]      = legal("i32.store8", Imm::Memarg);
	t[Opcode::I32Store16 as usize]     = legal("i32.store16", Imm::Memarg);
	t[Opcode::I32Const as usize]       = legal("i32.const", Imm::I32);
	t[Opcode::F64Const as usize]       = legal("f64.const", Imm::F64);
	t[Opcode::I32Eqz as usize]         = legal("i32.eqz", Imm::None);
	t[Opcode::I32Eq as usize]          = legal("i32.eq", Imm::None);
	t[Opcode::I32Ne as usize]          = legal("i32.ne", Imm::None);
	t[Opcode::I32LtS as usize]         = legal("i32.lt_s", Imm::None);
	t[Opcode::I32LtU as usize]         = legal("i32.lt_u", Imm::None);
	t[Opcode::I32GtS as usize]         = legal("i32.gt_s", Imm::None);
	t[Opcode::I32GtU as usize]         = legal("i32.gt_u", Imm::None);
	t[Opcode::I32LeS as usize]         = legal("i32.le_s", Imm::None);
	t[Opcode::I32LeU as usize]         = legal("i32.le_u", Imm::None);
	t[Opcode::I32GeS as usize]         = legal("i32.ge_s", Imm::None);
	t[Opcode::I32GeU as usize]         = legal("i32.ge_u", Imm::None);
	t[Opcode::F64Eq as usize]          = legal("f64.eq", Imm::None);
	t[Opcode::F64Ne as usize]          = legal("f64.ne", Imm::None);
	t[Opcode::F64Lt as usize]          = legal("f64.lt", Imm::None);
	t[Opcode::F64Gt as usize]          = legal("f64.gt", Imm::None);
	t[Opcode::F64Le as usize]          = legal("f64.le", Imm::None);
	t[Opcode::F64Ge as usize]          = legal("f64.ge", Imm::None);
	t[Opcode::I32Clz as usize]         = legal("i32.clz", Imm::None);
	t[Opcode::I32Ctz as usize]         = legal("i32.ctz", Imm::None);
	t[Opcode::I32Popcnt as usize]      = legal("i32.popcnt", Imm::None);
	t[Opcode::I32Add as usize]         = legal("i32.add", Imm::None);
	t[Opcode::I32Sub as usize]         = legal("i32.sub", Imm::None);
	t[Opcode::I32Mul as usize]         = legal("i32.mul", Imm::None);
	t[Opcode::I32DivS as usize]        = legal("i32.div_s", Imm::None);
	t[Opcode::I32DivU as usize]        = legal("i32.div_u", Imm::None);
	t[Opcode::I32RemS as usize]        = legal("i32.rem_s", Imm::None);
	t[Opcode::I32RemU as usize]        = legal("i32.rem_u", Imm::None);
	t[Opcode::I32And as usize]         = legal("i32.and", Imm::None);
	t[Opcode::I32Or as usize]          = legal("i32.or", Imm::None);
	t[Opcode::I32Xor as usize]         = legal("i32.xor", Imm::None);
	t[Opcode::I32Shl as usize]         = legal("i32.shl", Imm::None);
	t[Opcode::I32ShrS as usize]        = legal("i32.shr_s", Imm::None);
	t[Opcode::I32ShrU as usize]        = legal("i32.shr_u", Imm::None);
	t[Opcode::I32Rotl as usize]        = legal("i32.rotl", Imm::None);
	t[Opcode::I32Rotr as usize]        = legal("i32.rotr", Imm::None);
	t[Opcode::F64Add as usize]         = legal("f64.add", Imm::None);
	t[Opcode::F64Sub as usize]         = legal("f64.sub", Imm::None);
	t[Opcode::F64Mul as usize]         = legal("f64.mul", Imm::None);
	t[Opcode::F64Div as usize]         = legal("f64.div", Imm::None);
	t[Opcode::I32TruncF64S as usize]   = legal("i32.trunc_f64_s", Imm::None);
	t[Opcode::I32TruncF64U as usize]   = legal("i32.trunc_f64_u", Imm::None);
	t[Opcode::F64ConvertI32S as usize] = legal("f64.convert_i32_s", Imm::None);
	t[Opcode::F64ConvertI32U as usize] = legal("f64.convert_i32_u", Imm::None);
	t[Opcode::I32Extend8S as usize]    = legal("i32.extend8_s", Imm::None);
	t[Opcode::I32Extend16S as usize]   = legal("i32.extend16_s", Imm::None);
	t[Opcode::Jmp as usize]            = legal("jmp", Imm::PcDelta);
	t[Opcode::JmpIf as usize]          = legal("jmp_if", Imm::PcDelta);
	t[Opcode::JmpTable as usize]       = legal("jmp_table", Imm::PcDeltas);
	// illegal bytecodes
	t[0x06] = illegal("try", Imm::BlockType);
	t[0x07] = illegal("catch", Imm::Tag);
	t[0x08] = illegal("throw", Imm::Tag);
	t[0x09] = illegal("rethrow", Imm::None);
	t[0x12] = illegal("return_call", Imm::Func);
	t[0x13] = illegal("return_call_indirect", Imm::SigTable);
	t[0x14] = illegal("call_ref", Imm::None);
	t[0x15] = illegal("return_call_ref", Imm::None);
	t[0x18] = illegal("delegate", Imm::None);
	t[0x19] = illegal("catch_all", Imm::None);
	t[0x1C] = illegal("select", Imm::ValTypes);
	t[0x29] = illegal("i64.load", Imm::Memarg);
	t[0x2A] = illegal("f32.load", Imm::Memarg);
	t[0x30] = illegal("i64.load8_s", Imm::Memarg);
	t[0x31] = illegal("i64.load8_u", Imm::Memarg);
	t[0x32] = illegal("i64.load16_s", Imm::Memarg);
	t[0x33] = illegal("i64.load16_u", Imm::Memarg);
	t[0x34] = illegal("i64.load32_s", Imm::Memarg);
	t[0x35] = illegal("i64.load32_u", Imm::Memarg);
	t[0x37] = illegal("i64.store", Imm::Memarg);
	t[0x38] = illegal("f32.store", Imm::Memarg);
	t[0x3C] = illegal("i64.store8", Imm::Memarg);
	t[0x3D] = illegal("i64.store16", Imm::Memarg);
	t[0x3E] = illegal("i64.store32", Imm::Memarg);
	t[0x3F] = illegal("memory.size", Imm::Memory);
	t[0x40] = illegal("memory.grow", Imm::Memory);
	t[0x42] = illegal("i64.const", Imm::I64);
	t[0x43] = illegal("f32.const", Imm::F32);
	t[0x50] = illegal("i64.eqz", Imm::None);
	t[0x51] = illegal("i64.eq", Imm::None);
	t[0x52] = illegal("i64.ne", Imm::None);
	t[0x53] = illegal("i64.lt_s", Imm::None);
	t[0x54] = illegal("i64.lt_u", Imm::None);
	t[0x55] = illegal("i64.gt_s", Imm::None);
	t[0x56] = illegal("i64.gt_u", Imm::None);
	t[0x57] = illegal("i64.le_s", Imm::None);
	t[0x58] = illegal("i64.le_u", Imm::None);
	t[0x59] = illegal("i64.ge_s", Imm::None);
	t[0x5A] = illegal("i64.ge_u", Imm::None);
	t[0x5B] = illegal("f32.eq", Imm::None);
	t[0x5C] = illegal("f32.ne", Imm::None);
	t[0x5D] = illegal("f32.lt", Imm::None);
	t[0x5E] = illegal("f32.gt", Imm::None);
	t[0x5F] = illegal("f32.le", Imm::None);
	t[0x60] = illegal("f32.ge", Imm::None);
	t[0x79] = illegal("i64.clz", Imm::None);
	t[0x7A] = illegal("i64.ctz", Imm::None);
	t[0x7B] = illegal("i64.popcnt", Imm::None);
	t[0x7C] = illegal("i64.add", Imm::None);
	t[0x7D] = illegal("i64.sub", Imm::None);
	t[0x7E] = illegal("i64.mul", Imm::None);
	t[0x7F] = illegal("i64.div_s", Imm::None);
	t[0x80] = illegal("i64.div_u", Imm::None);
	t[0x81] = illegal("i64.rem_s", Imm::None);
	t[0x82] = illegal("i64.rem_u", Imm::None);
	t[0x83] = illegal("i64.and", Imm::None);
	t[0x84] = illegal("i64.or", Imm::None);
	t[0x85] = illegal("i64.xor", Imm::None);
	t[0x86] = illegal("i64.shl", Imm::None);
	t[0x87] = illegal("i64.shr_s", Imm::None);
	t[0x88] = illegal("i64.shr_u", Imm::None);
	t[0x89] = illegal("i64.rotl", Imm::None);
	t[0x8A] = illegal("i64.rotr", Imm::None);
	t[0x8B] = illegal("f32.abs", Imm::None);
	t[0x8C] = illegal("f32.neg", Imm::None);
	t[0x8D] = illegal("f32.ceil", Imm::None);
	t[0x8E] = illegal("f32.floor", Imm::None);
	t[0x8F] = illegal("f32.trunc", Imm::None);
	t[0x90] = illegal("f32.nearest", Imm::None);
	t[0x91] = illegal("f32.sqrt", Imm::None);
	t[0x92] = illegal("f32.add", Imm::None);
	t[0x93] = illegal("f32.sub", Imm::None);
	t[0x94] = illegal("f32.mul", Imm::None);
	t[0x95] = illegal("f32.div", Imm::None);
	t[0x96] = illegal("f32.min", Imm::None);
	t[0x97] = illegal("f32.max", Imm::None);
	t[0x98] = illegal("f32.copysign", Imm::None);
	t[0x99] = illegal("f64.abs", Imm::None);
	t[0x9A] = illegal("f64.neg", Imm::None);
	t[0x9B] = illegal("f64.ceil", Imm::None);
	t[0x9C] = illegal("f64.floor", Imm::None);
	t[0x9D] = illegal("f64.trunc", Imm::None);
	t[0x9E] = illegal("f64.nearest", Imm::None);
	t[0x9F] = illegal("f64.sqrt", Imm::None);
	t[0xA4] = illegal("f64.min", Imm::None);
	t[0xA5] = illegal("f64.max", Imm::None);
	t[0xA6] = illegal("f64.copysign", Imm::None);
	t[0xA7] = illegal("i32.wrap_i64", Imm::None);
	t[0xA8] = illegal("i32.trunc_f32_s", Imm::None);
	t[0xA9] = illegal("i32.trunc_f32_u", Imm::None);
	t[0xAC] = illegal("i64.extend_i32_s", Imm::None);
	t[0xAD] = illegal("i64.extend_i32_u", Imm::None);
	t[0xAE] = illegal("i64.trunc_f32_s", Imm::None);
	t[0xAF] = illegal("i64.trunc_f32_u", Imm::None);
	t[0xB0] = illegal("i64.trunc_f64_s", Imm::None);
	t[0xB1] = illegal("i64.trunc_f64_u", Imm::None);
	t[0xB2] = illegal("f32.convert_i32_s", Imm::None);
	t[0xB3] = illegal("f32.convert_i32_u", Imm::None);
	t[0xB4] = illegal("f32.convert_i64_s", Imm::None);
	t[0xB5] = illegal("f32.convert_i64_u", Imm::None);
	t[0xB6] = illegal("f32.demote_f64", Imm::None);
	t[0xB9] = illegal("f64.convert_i64_s", Imm::None);
	t[0xBA] = illegal("f64.convert_i64_u", Imm::None);
	t[0xBB] = illegal("f64.promote_f32", Imm::None);
	t[0xBC] = illegal("i32.reinterpret_f32", Imm::None);
	t[0xBD] = illegal("i64.reinterpret_f64", Imm::None);
	t[0xBE] = illegal("f32.reinterpret_i32", Imm::None);
	t[0xBF] = illegal("f64.reinterpret_i64", Imm::None);
	t[0xC2] = illegal("i64.extend8_s", Imm::None);
	t[0xC3] = illegal("i64.extend16_s", Imm::None);
	t[0xC4] = illegal("i64.extend32_s", Imm::None);
	t[0xD0] = illegal("ref.null", Imm::RefNullType);
	t[0xD1] = illegal("ref.is_null", Imm::None);
	t[0xD2] = illegal("ref.func", Imm::Func);
	t[0xD3] = illegal("ref.eq", Imm::None);
	t[0xD4] = illegal("ref.as_non_null", Imm::None);
	t[0xD5] = illegal("br_on_null", Imm::Label);
	t[0xD6] = illegal("br_on_non_null", Imm::Label);
	t
};

/// Looks up the metadata for an opcode byte, or `None` for bytes the table
/// does not know at all.
pub fn lookup(byte: u8) -> Option<&'static OpEntry> {
	let entry = &OPCODE_TABLE[byte as usize];
	if entry.mnemonic.is_empty() {
		None
	} else {
		Some(entry)
	}
}

/// Returns the mnemonic of an opcode byte.
pub fn mnemonic(byte: u8) -> &'static str {
	lookup(byte).map(|entry| entry.mnemonic).unwrap_or("<unknown>")
}

/// The producer refuses structured conditionals and already-rewritten jumps
/// even though the runner's table accepts them.
pub fn producer_rejects(byte: u8) -> bool {
	matches!(
		Opcode::try_from(byte),
		Ok(Opcode::If) | Ok(Opcode::Else) | Ok(Opcode::Jmp) | Ok(Opcode::JmpIf) | Ok(Opcode::JmpTable)
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dialect_entries() {
		let entry = lookup(Opcode::Br as u8).unwrap();
		assert_eq!(entry.mnemonic, "br");
		assert_eq!(entry.imm, Imm::Label);
		assert!(entry.legal);

		let entry = lookup(Opcode::JmpTable as u8).unwrap();
		assert_eq!(entry.imm, Imm::PcDeltas);
		assert!(entry.legal);
	}

	#[test]
	fn sixty_four_bit_opcodes_are_illegal() {
		for byte in [0x42u8, 0x29, 0x7C, 0xBD] {
			let entry = lookup(byte).unwrap();
			assert!(!entry.legal, "{} should be illegal", entry.mnemonic);
		}
	}

	#[test]
	fn unknown_bytes_have_no_entry() {
		assert!(lookup(0x1D).is_none());
		assert!(lookup(0xFF).is_none());
	}

	#[test]
	fn producer_restrictions() {
		assert!(producer_rejects(Opcode::If as u8));
		assert!(producer_rejects(Opcode::Else as u8));
		assert!(producer_rejects(Opcode::Jmp as u8));
		assert!(!producer_rejects(Opcode::Br as u8));
		assert!(!producer_rejects(Opcode::Block as u8));
	}
}
