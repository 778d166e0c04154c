//! The producer pass: re-emits a module with every branch label padded to a
//! 4-byte LEB, so the branch rewriter can later overwrite the labels with
//! signed PC deltas without moving a single byte.
//!
//! Everything outside the code section is copied verbatim. Inside the code
//! section, the section and body lengths are reserved as 5-byte padded LEBs
//! and patched once their content is emitted, since widening the labels
//! grows each body.

use crate::bytecode::{
	encode_u32_leb4, encode_u32_leb5, opcode, skip_insn, skip_local_decls, BufferError, Imm,
	WasmBuffer,
};
use crate::parse::SectionId;
use thiserror::Error;
use tracing::trace;

const WASM_MAGIC: u32 = 0x6D73_6100;
const WASM_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeeifyError {
	#[error("the module does not start with the magic constant 0x00 0x61 0x73 0x6D")]
	InvalidMagic,

	#[error("invalid Wasm version {0:#010x}, expected 1")]
	InvalidVersion(u32),

	#[error("section or body length overruns the module")]
	LengthOverrun,

	#[error("illegal bytecode {byte:#04x} ({mnemonic}) at offset {offset}")]
	IllegalOpcode {
		offset: usize,
		byte: u8,
		mnemonic: &'static str,
	},

	#[error("illegal block type {block_type} at offset {offset}")]
	IllegalBlockType { offset: usize, block_type: i32 },

	#[error("illegal table index {table} at offset {offset}")]
	IllegalTableIndex { offset: usize, table: u32 },

	#[error(transparent)]
	Buffer(#[from] BufferError),
}

/// Transforms `input` into a module whose branch labels are 4-byte padded.
pub fn weeify(input: &[u8]) -> Result<Vec<u8>, WeeifyError> {
	let mut buf = WasmBuffer::new(input);
	let magic = buf.read_u32_le().map_err(|_| WeeifyError::InvalidMagic)?;
	if magic != WASM_MAGIC {
		return Err(WeeifyError::InvalidMagic);
	}
	let version = buf.read_u32_le()?;
	if version != WASM_VERSION {
		return Err(WeeifyError::InvalidVersion(version));
	}

	trace!("copy header");
	let mut out = input[..buf.pos()].to_vec();

	while !buf.is_at_end() {
		let section_start = buf.pos();
		let id = buf.read_u8()?;
		let (length, _) = buf.read_u32_leb()?;
		let section_end = buf.pos() + length as usize;
		if section_end > buf.len() {
			return Err(WeeifyError::LengthOverrun);
		}
		trace!("section {id:#04x}, {length} bytes");

		if id == SectionId::Code as u8 {
			transform_code_section(&mut out, &mut buf, section_end)?;
		} else {
			trace!("copy {} byte section", section_end - section_start);
			out.extend_from_slice(&input[section_start..section_end]);
		}
		buf.set_pos(section_end);
	}
	trace!("output size = {} bytes", out.len());
	Ok(out)
}

/// Emits an unsigned LEB in its minimal encoding.
fn emit_u32_leb(out: &mut Vec<u8>, mut value: u32) {
	loop {
		let next = value >> 7;
		let mut byte = (value & 0x7F) as u8;
		if next != 0 {
			byte |= 0x80;
		}
		out.push(byte);
		value = next;
		if value == 0 {
			break;
		}
	}
}

/// Reserves a 5-byte padded LEB for a length that is patched later.
fn reserve_length(out: &mut Vec<u8>) -> usize {
	let at = out.len();
	out.extend_from_slice(&encode_u32_leb5(0));
	at
}

fn patch_length(out: &mut Vec<u8>, at: usize) {
	let length = (out.len() - at - 5) as u32;
	trace!("patch length @{at} = {length}");
	out[at..at + 5].copy_from_slice(&encode_u32_leb5(length));
}

fn transform_code_section(
	out: &mut Vec<u8>,
	buf: &mut WasmBuffer,
	section_end: usize,
) -> Result<(), WeeifyError> {
	out.push(SectionId::Code as u8);
	let section_patch = reserve_length(out);

	let (body_count, _) = buf.read_u32_leb()?;
	emit_u32_leb(out, body_count);
	for i in 0..body_count {
		trace!("transform body #{i}");
		transform_body(out, buf, section_end)?;
	}
	patch_length(out, section_patch);
	Ok(())
}

fn transform_body(
	out: &mut Vec<u8>,
	buf: &mut WasmBuffer,
	section_end: usize,
) -> Result<(), WeeifyError> {
	let (body_len, _) = buf.read_u32_leb()?;
	let body_end = buf.pos() + body_len as usize;
	if body_end > section_end {
		return Err(WeeifyError::LengthOverrun);
	}
	let body_patch = reserve_length(out);

	// the locals prologue is copied verbatim
	let locals_start = buf.pos();
	skip_local_decls(buf)?;
	out.extend_from_slice(&buf.bytes()[locals_start..buf.pos()]);

	while buf.pos() < body_end {
		transform_insn(out, buf)?;
	}
	if buf.pos() != body_end {
		return Err(WeeifyError::LengthOverrun);
	}
	patch_length(out, body_patch);
	Ok(())
}

fn transform_insn(out: &mut Vec<u8>, buf: &mut WasmBuffer) -> Result<(), WeeifyError> {
	let start = buf.pos();
	let code = buf.read_u8()?;
	let entry = opcode::lookup(code).ok_or(WeeifyError::IllegalOpcode {
		offset: start,
		byte: code,
		mnemonic: "<unknown>",
	})?;
	if !entry.legal || opcode::producer_rejects(code) {
		return Err(WeeifyError::IllegalOpcode {
			offset: start,
			byte: code,
			mnemonic: entry.mnemonic,
		});
	}

	match entry.imm {
		Imm::Label => {
			let (label, _) = buf.read_u32_leb()?;
			trace!("{} {label}", entry.mnemonic);
			out.push(code);
			out.extend_from_slice(&encode_u32_leb4(label));
		}
		Imm::Labels => {
			let (count, _) = buf.read_u32_leb()?;
			trace!("{} {count}", entry.mnemonic);
			out.push(code);
			out.extend_from_slice(&encode_u32_leb4(count));
			for _ in 0..=count {
				let (label, _) = buf.read_u32_leb()?;
				out.extend_from_slice(&encode_u32_leb4(label));
			}
		}
		Imm::BlockType => {
			let (block_type, _) = buf.read_i32_leb()?;
			if block_type != -64 {
				return Err(WeeifyError::IllegalBlockType {
					offset: start,
					block_type,
				});
			}
			out.extend_from_slice(&buf.bytes()[start..buf.pos()]);
		}
		Imm::SigTable => {
			let (_sig, _) = buf.read_u32_leb()?;
			let (table, _) = buf.read_u32_leb()?;
			if table != 0 {
				return Err(WeeifyError::IllegalTableIndex {
					offset: start,
					table,
				});
			}
			out.extend_from_slice(&buf.bytes()[start..buf.pos()]);
		}
		_ => {
			// decode to find the extent, then copy the bytes as-is
			buf.set_pos(start);
			skip_insn(buf)?;
			out.extend_from_slice(&buf.bytes()[start..buf.pos()]);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parse::Module;
	use crate::rewrite::rewrite_module;
	use pretty_assertions::assert_eq;

	const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

	fn section(id: u8, payload: &[u8]) -> Vec<u8> {
		let mut bytes = vec![id];
		leb128::write::unsigned(&mut bytes, payload.len() as u64).unwrap();
		bytes.extend_from_slice(payload);
		bytes
	}

	fn one_body_module(insns: &[u8]) -> Vec<u8> {
		let mut bytes = HEADER.to_vec();
		bytes.extend_from_slice(&section(1, &[0x01, 0x60, 0x00, 0x00]));
		bytes.extend_from_slice(&section(3, &[0x01, 0x00]));
		bytes.extend_from_slice(&section(
			7,
			&[0x01, 0x04, b'm', b'a', b'i', b'n', 0x00, 0x00],
		));
		let mut body = vec![0x00]; // no locals
		body.extend_from_slice(insns);
		let mut code = vec![0x01];
		leb128::write::unsigned(&mut code, body.len() as u64).unwrap();
		code.extend_from_slice(&body);
		bytes.extend_from_slice(&section(10, &code));
		bytes
	}

	#[test]
	fn labels_widen_to_four_bytes() {
		let input = one_body_module(&[
			0x02, 0x40, // block
			0x0C, 0x00, // br 0, minimal label
			0x0B, // end
			0x0B, // end
		]);
		let output = weeify(&input).unwrap();
		let module = Module::parse(output).unwrap();
		assert_eq!(
			module.body(&module.funcs[0]),
			&[
				0x02, 0x40, // block
				0x0C, 0x80, 0x80, 0x80, 0x00, // br 0, padded
				0x0B, // end
				0x0B, // end
			]
		);
	}

	#[test]
	fn branch_table_count_and_labels_widen() {
		let input = one_body_module(&[
			0x02, 0x40, // block
			0x41, 0x00, // i32.const 0
			0x0E, 0x01, 0x00, 0x01, // br_table 1 [0] default 1
			0x0B, // end
			0x0B, // end
		]);
		let output = weeify(&input).unwrap();
		let module = Module::parse(output).unwrap();
		assert_eq!(
			module.body(&module.funcs[0]),
			&[
				0x02, 0x40, // block
				0x41, 0x00, // i32.const 0
				0x0E, // br_table
				0x81, 0x80, 0x80, 0x00, // count 1, padded
				0x80, 0x80, 0x80, 0x00, // label 0, padded
				0x81, 0x80, 0x80, 0x00, // default 1, padded
				0x0B, // end
				0x0B, // end
			]
		);
	}

	#[test]
	fn code_section_lengths_are_padded_lebs() {
		let input = one_body_module(&[0x0B]);
		let output = weeify(&input).unwrap();
		// find the code section in the output
		let mut buf = WasmBuffer::new(&output);
		buf.set_pos(8);
		loop {
			let id = buf.read_u8().unwrap();
			let (length, width) = buf.read_u32_leb().unwrap();
			if id == 10 {
				assert_eq!(width, 5, "section length should be a padded 5-byte LEB");
				let (body_count, _) = buf.read_u32_leb().unwrap();
				assert_eq!(body_count, 1);
				let (_body_len, body_width) = buf.read_u32_leb().unwrap();
				assert_eq!(body_width, 5, "body length should be a padded 5-byte LEB");
				break;
			}
			buf.set_pos(buf.pos() + length as usize);
		}
	}

	#[test]
	fn non_code_sections_copied_verbatim() {
		let input = one_body_module(&[0x0B]);
		let output = weeify(&input).unwrap();
		// header (8) + type (6) + function (4) + export (10) sections are
		// untouched; only the trailing code section is re-encoded
		assert_eq!(&output[..28], &input[..28]);
	}

	#[test]
	fn output_is_idempotent() {
		let input = one_body_module(&[
			0x03, 0x40, // loop
			0x41, 0x01, // i32.const 1
			0x0D, 0x00, // br_if 0
			0x0B, // end
			0x0B, // end
		]);
		let once = weeify(&input).unwrap();
		let twice = weeify(&once).unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn output_satisfies_rewriter_precondition() {
		let input = one_body_module(&[
			0x02, 0x40, // block
			0x03, 0x40, // loop
			0x0C, 0x01, // br 1
			0x0B, // end
			0x0B, // end
			0x0B, // end
		]);
		let output = weeify(&input).unwrap();
		let mut module = Module::parse(output).unwrap();
		rewrite_module(&mut module).unwrap();
	}

	#[test]
	fn structured_conditionals_rejected() {
		let input = one_body_module(&[
			0x04, 0x40, // if
			0x0B, // end
			0x0B, // end
		]);
		// the `if` sits at offset 33: header (8) + type (6) + function (4)
		// + export (10) + code section id, length, count, body length and
		// locals count (5)
		assert_eq!(
			weeify(&input),
			Err(WeeifyError::IllegalOpcode {
				offset: 33,
				byte: 0x04,
				mnemonic: "if",
			})
		);
	}

	#[test]
	fn already_rewritten_jumps_rejected() {
		let input = one_body_module(&[
			0xF0, 0x80, 0x80, 0x80, 0x00, // jmp
			0x0B, // end
		]);
		assert!(matches!(
			weeify(&input),
			Err(WeeifyError::IllegalOpcode { byte: 0xF0, .. })
		));
	}

	#[test]
	fn illegal_dialect_opcode_rejected() {
		let input = one_body_module(&[
			0x42, 0x00, // i64.const 0
			0x1A, // drop
			0x0B, // end
		]);
		assert!(matches!(
			weeify(&input),
			Err(WeeifyError::IllegalOpcode { byte: 0x42, .. })
		));
	}

	#[test]
	fn module_without_code_section_unchanged() {
		let mut input = HEADER.to_vec();
		input.extend_from_slice(&section(1, &[0x01, 0x60, 0x00, 0x00]));
		let output = weeify(&input).unwrap();
		assert_eq!(output, input);
	}
}
