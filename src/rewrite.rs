//! The branch rewriter: a single linear pass over a function body that
//! turns structured `br`/`br_if`/`br_table` branches into PC-relative
//! `jmp`/`jmp_if`/`jmp_table` jumps, in place.
//!
//! The producer pass pads every branch label to a 4-byte LEB, so each label
//! can be overwritten with a signed 4-byte delta without moving any other
//! byte. Forward targets are not known when a branch is reached, so every
//! branch records its immediate's offset with the frame it targets and the
//! frame patches all of its references when its `end` is reached. A branch
//! to a loop head is patched by the same path, just with the loop's start
//! PC as the target.

use crate::bytecode::{encode_i32_leb4, opcode, skip_insn, BufferError, Opcode, WasmBuffer};
use crate::parse::Module;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
	#[error("branch label at offset {offset} is not a 4-byte LEB ({width} bytes)")]
	UnpaddedLabel { offset: usize, width: usize },

	#[error("branch depth {depth} at offset {offset} exceeds the control stack")]
	DepthOutOfRange { offset: usize, depth: u32 },

	#[error("end at offset {offset} without an open frame")]
	EndWithoutFrame { offset: usize },

	#[error("control stack not empty at end of body ({depth} open frames)")]
	UnbalancedControl { depth: usize },

	#[error("illegal bytecode {byte:#04x} ({mnemonic}) at offset {offset}")]
	IllegalOpcode {
		offset: usize,
		byte: u8,
		mnemonic: &'static str,
	},

	#[error(transparent)]
	Buffer(#[from] BufferError),
}

/// One open control scope: `block`, `loop`, or the function body itself.
struct Frame {
	is_loop: bool,
	start_pc: usize,
	/// Offsets of 4-byte label immediates waiting for this frame's target PC.
	refs: Vec<usize>,
}

/// Rewrites the branches of every function body in `module`.
pub fn rewrite_module(module: &mut Module) -> Result<(), RewriteError> {
	let ranges: Vec<_> = module.funcs.iter().map(|func| func.code.clone()).collect();
	for (index, range) in ranges.into_iter().enumerate() {
		if range.is_empty() {
			continue;
		}
		trace!("rewriting branches in func #{index}");
		rewrite_function(&mut module.bytes[range])?;
	}
	Ok(())
}

/// Rewrites the branches of a single instruction stream (locals prologue not
/// included), mutating it in place.
pub fn rewrite_function(body: &mut [u8]) -> Result<(), RewriteError> {
	let mut frames = vec![Frame {
		is_loop: false,
		start_pc: 0,
		refs: Vec::new(),
	}];

	let mut pc = 0usize;
	while pc < body.len() {
		let code = body[pc];
		match Opcode::try_from(code) {
			Ok(Opcode::Block) | Ok(Opcode::Loop) => {
				trace!("+{pc:<4} rewrite: control block, depth {}", frames.len());
				frames.push(Frame {
					is_loop: code == Opcode::Loop as u8,
					start_pc: pc,
					refs: Vec::new(),
				});
				let mut buf = WasmBuffer::at(body, pc + 1);
				buf.read_i32_leb()?; // block type
				pc = buf.pos();
			}
			Ok(Opcode::End) => {
				trace!("+{pc:<4} rewrite: end, depth {}", frames.len());
				let frame = frames
					.pop()
					.ok_or(RewriteError::EndWithoutFrame { offset: pc })?;
				// loops are entered from their head; everything else is
				// left towards the instruction after the end
				let target_pc = if frame.is_loop { frame.start_pc } else { pc + 1 };
				for ref_pc in frame.refs {
					let delta = target_pc as i64 - ref_pc as i64;
					trace!("+{ref_pc:<4} rewrite: patch => {delta}");
					body[ref_pc..ref_pc + 4].copy_from_slice(&encode_i32_leb4(delta as i32));
				}
				pc += 1;
			}
			Ok(Opcode::Br) => {
				body[pc] = Opcode::Jmp as u8;
				let ref_pc = pc + 1;
				let depth = read_label(body, ref_pc)?;
				trace!("+{pc:<4} rewrite: br {depth}");
				record_ref(&mut frames, depth, ref_pc)?;
				pc = ref_pc + 4;
			}
			Ok(Opcode::BrIf) => {
				body[pc] = Opcode::JmpIf as u8;
				let ref_pc = pc + 1;
				let depth = read_label(body, ref_pc)?;
				trace!("+{pc:<4} rewrite: br_if {depth}");
				record_ref(&mut frames, depth, ref_pc)?;
				pc = ref_pc + 4;
			}
			Ok(Opcode::BrTable) => {
				body[pc] = Opcode::JmpTable as u8;
				let (count, labels_start) = {
					let mut buf = WasmBuffer::at(body, pc + 1);
					let (count, _) = buf.read_u32_leb()?;
					(count, buf.pos())
				};
				trace!("+{pc:<4} rewrite: br_table {count}");
				let mut ref_pc = labels_start;
				for _ in 0..=count {
					let depth = read_label(body, ref_pc)?;
					record_ref(&mut frames, depth, ref_pc)?;
					ref_pc += 4;
				}
				pc = ref_pc;
			}
			_ => {
				match opcode::lookup(code) {
					Some(entry) if entry.legal => {}
					Some(entry) => {
						return Err(RewriteError::IllegalOpcode {
							offset: pc,
							byte: code,
							mnemonic: entry.mnemonic,
						})
					}
					None => {
						return Err(RewriteError::IllegalOpcode {
							offset: pc,
							byte: code,
							mnemonic: "<unknown>",
						})
					}
				}
				let mut buf = WasmBuffer::at(body, pc);
				skip_insn(&mut buf)?;
				pc = buf.pos();
			}
		}
	}

	if !frames.is_empty() {
		return Err(RewriteError::UnbalancedControl {
			depth: frames.len(),
		});
	}
	Ok(())
}

/// Reads what must be a 4-byte LEB branch depth at `at`.
fn read_label(body: &[u8], at: usize) -> Result<u32, RewriteError> {
	let mut buf = WasmBuffer::at(body, at);
	let (depth, width) = buf.read_u32_leb()?;
	if width != 4 {
		return Err(RewriteError::UnpaddedLabel { offset: at, width });
	}
	Ok(depth)
}

fn record_ref(frames: &mut [Frame], depth: u32, ref_pc: usize) -> Result<(), RewriteError> {
	let index = frames
		.len()
		.checked_sub(1 + depth as usize)
		.ok_or(RewriteError::DepthOutOfRange {
			offset: ref_pc,
			depth,
		})?;
	frames[index].refs.push(ref_pc);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bytecode::encode_u32_leb4;

	fn decode_delta(body: &[u8], at: usize) -> i32 {
		let mut buf = WasmBuffer::at(body, at);
		let (delta, width) = buf.read_i32_leb().unwrap();
		assert_eq!(width, 4);
		delta
	}

	#[test]
	fn loop_branch_patches_backwards() {
		let mut body = vec![
			0x03, 0x40, // loop (pc 0)
			0x0C, // br 0 (pc 2)
		];
		body.extend_from_slice(&encode_u32_leb4(0)); // label at pc 3
		body.extend_from_slice(&[
			0x0B, // end (loop)
			0x0B, // end (function)
		]);
		rewrite_function(&mut body).unwrap();
		assert_eq!(body[2], Opcode::Jmp as u8);
		// the delta points from the immediate back to the loop head
		assert_eq!(decode_delta(&body, 3), -3);
	}

	#[test]
	fn nested_blocks_patch_past_outer_end() {
		let mut body = vec![
			0x02, 0x40, // block (pc 0)
			0x02, 0x40, // block (pc 2)
			0x0C, // br 1 (pc 4)
		];
		body.extend_from_slice(&encode_u32_leb4(1)); // label at pc 5
		body.extend_from_slice(&[
			0x0B, // end (inner, pc 9)
			0x0B, // end (outer, pc 10)
			0x0B, // end (function, pc 11)
		]);
		rewrite_function(&mut body).unwrap();
		assert_eq!(body[4], Opcode::Jmp as u8);
		// 5 + 6 = 11, the byte after the outer end
		assert_eq!(decode_delta(&body, 5), 6);
	}

	#[test]
	fn branch_to_function_frame_targets_body_end() {
		let mut body = vec![0x0C]; // br 0 at depth of the function itself
		body.extend_from_slice(&encode_u32_leb4(0));
		body.push(0x0B); // end (function, pc 5)
		rewrite_function(&mut body).unwrap();
		assert_eq!(body[0], Opcode::Jmp as u8);
		// 1 + 5 = 6 = len, one past the final end
		assert_eq!(decode_delta(&body, 1), 5);
	}

	#[test]
	fn branch_table_labels_patch_independently() {
		let mut body = vec![
			0x02, 0x40, // block A (pc 0)
			0x02, 0x40, // block B (pc 2)
			0x02, 0x40, // block C (pc 4)
			0x0E, // br_table (pc 6)
		];
		body.extend_from_slice(&encode_u32_leb4(3)); // count at pc 7
		body.extend_from_slice(&encode_u32_leb4(0)); // label at pc 11 -> C
		body.extend_from_slice(&encode_u32_leb4(1)); // label at pc 15 -> B
		body.extend_from_slice(&encode_u32_leb4(2)); // label at pc 19 -> A
		body.extend_from_slice(&encode_u32_leb4(0)); // default at pc 23 -> C
		body.extend_from_slice(&[
			0x0B, // end C (pc 27)
			0x0B, // end B (pc 28)
			0x0B, // end A (pc 29)
			0x0B, // end function (pc 30)
		]);
		rewrite_function(&mut body).unwrap();
		assert_eq!(body[6], Opcode::JmpTable as u8);
		assert_eq!(decode_delta(&body, 11), 28 - 11); // after end C
		assert_eq!(decode_delta(&body, 15), 29 - 15); // after end B
		assert_eq!(decode_delta(&body, 19), 30 - 19); // after end A
		assert_eq!(decode_delta(&body, 23), 28 - 23); // after end C
	}

	#[test]
	fn rewrite_leaves_no_structured_branches() {
		let mut body = vec![
			0x02, 0x40, // block
			0x03, 0x40, // loop
			0x41, 0x00, // i32.const 0
			0x0D, // br_if 0
		];
		body.extend_from_slice(&encode_u32_leb4(0));
		body.push(0x0C); // br 1
		body.extend_from_slice(&encode_u32_leb4(1));
		body.extend_from_slice(&[
			0x0B, // end (loop)
			0x0B, // end (block)
			0x0B, // end (function)
		]);
		rewrite_function(&mut body).unwrap();

		// walk the instruction boundaries and count branch opcodes
		let mut jumps = 0;
		let mut buf = WasmBuffer::at(&body, 0);
		while !buf.is_at_end() {
			let code = buf.peek_u8().unwrap();
			assert!(
				!matches!(
					Opcode::try_from(code),
					Ok(Opcode::Br) | Ok(Opcode::BrIf) | Ok(Opcode::BrTable)
				),
				"structured branch left at offset {}",
				buf.pos()
			);
			if matches!(
				Opcode::try_from(code),
				Ok(Opcode::Jmp) | Ok(Opcode::JmpIf) | Ok(Opcode::JmpTable)
			) {
				jumps += 1;
			}
			skip_insn(&mut buf).unwrap();
		}
		assert_eq!(jumps, 2);
	}

	#[test]
	fn unpadded_label_rejected() {
		let mut body = vec![
			0x02, 0x40, // block
			0x0C, 0x00, // br 0 with a minimal 1-byte label
			0x0B, 0x0B,
		];
		assert_eq!(
			rewrite_function(&mut body),
			Err(RewriteError::UnpaddedLabel { offset: 3, width: 1 })
		);
	}

	#[test]
	fn excessive_depth_rejected() {
		let mut body = vec![0x0C]; // br 5 with nothing on the control stack
		body.extend_from_slice(&encode_u32_leb4(5));
		body.push(0x0B);
		assert_eq!(
			rewrite_function(&mut body),
			Err(RewriteError::DepthOutOfRange { offset: 1, depth: 5 })
		);
	}

	#[test]
	fn illegal_opcode_rejected() {
		let mut body = vec![
			0x42, 0x00, // i64.const 0
			0x0B,
		];
		assert_eq!(
			rewrite_function(&mut body),
			Err(RewriteError::IllegalOpcode {
				offset: 0,
				byte: 0x42,
				mnemonic: "i64.const",
			})
		);
	}

	#[test]
	fn unbalanced_body_rejected() {
		let mut body = vec![0x02, 0x40]; // block with no end at all
		assert!(matches!(
			rewrite_function(&mut body),
			Err(RewriteError::UnbalancedControl { depth: 2 })
		));

		let mut body = vec![0x0B, 0x0B]; // one end too many
		assert_eq!(
			rewrite_function(&mut body),
			Err(RewriteError::EndWithoutFrame { offset: 1 })
		);
	}
}
