use crate::bytecode::error::BufferError;

/// A cursor over the raw bytes of a module, `[start, end)`.
///
/// All reads advance the cursor and fail with [`BufferError::UnexpectedEnd`]
/// instead of running past the end. The LEB readers also report how many
/// bytes the encoding occupied, which the rewriter uses to insist on exact
/// 4-byte padded labels.
#[derive(Debug, Clone)]
pub struct WasmBuffer<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> WasmBuffer<'a> {
	pub fn new(bytes: &'a [u8]) -> Self {
		WasmBuffer { bytes, pos: 0 }
	}

	/// A cursor over `bytes` that starts reading at `pos`.
	pub fn at(bytes: &'a [u8], pos: usize) -> Self {
		WasmBuffer { bytes, pos }
	}

	pub fn pos(&self) -> usize {
		self.pos
	}

	/// The whole underlying byte slice, independent of the cursor.
	pub fn bytes(&self) -> &'a [u8] {
		self.bytes
	}

	/// Moves the cursor to an absolute offset. Used to skip to a section end.
	pub fn set_pos(&mut self, pos: usize) {
		self.pos = pos.min(self.bytes.len());
	}

	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn remaining(&self) -> usize {
		self.bytes.len() - self.pos
	}

	pub fn is_at_end(&self) -> bool {
		self.pos >= self.bytes.len()
	}

	pub fn read_u8(&mut self) -> Result<u8, BufferError> {
		let byte = *self
			.bytes
			.get(self.pos)
			.ok_or(BufferError::UnexpectedEnd { at: self.pos })?;
		self.pos += 1;
		Ok(byte)
	}

	/// Peeks at the next byte without advancing.
	pub fn peek_u8(&self) -> Result<u8, BufferError> {
		self.bytes
			.get(self.pos)
			.copied()
			.ok_or(BufferError::UnexpectedEnd { at: self.pos })
	}

	/// Borrows the next `count` bytes without copying.
	pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], BufferError> {
		let end = self
			.pos
			.checked_add(count)
			.filter(|&end| end <= self.bytes.len())
			.ok_or(BufferError::UnexpectedEnd { at: self.pos })?;
		let slice = &self.bytes[self.pos..end];
		self.pos = end;
		Ok(slice)
	}

	pub fn read_u32_le(&mut self) -> Result<u32, BufferError> {
		let mut raw = [0u8; 4];
		raw.copy_from_slice(self.read_bytes(4)?);
		Ok(u32::from_le_bytes(raw))
	}

	pub fn read_u64_le(&mut self) -> Result<u64, BufferError> {
		let mut raw = [0u8; 8];
		raw.copy_from_slice(self.read_bytes(8)?);
		Ok(u64::from_le_bytes(raw))
	}

	pub fn read_f64_le(&mut self) -> Result<f64, BufferError> {
		Ok(f64::from_bits(self.read_u64_le()?))
	}

	/// Reads an unsigned LEB128 of at most 5 bytes, returning the value and
	/// the number of bytes consumed.
	pub fn read_u32_leb(&mut self) -> Result<(u32, usize), BufferError> {
		let at = self.pos;
		let (value, width) = self.read_unsigned_leb()?;
		if width > 5 || value > u64::from(u32::MAX) {
			return Err(BufferError::LebOverflow { at });
		}
		self.pos += width;
		Ok((value as u32, width))
	}

	/// Reads a signed LEB128 of at most 5 bytes.
	pub fn read_i32_leb(&mut self) -> Result<(i32, usize), BufferError> {
		let at = self.pos;
		let (value, width) = self.read_signed_leb()?;
		if width > 5 || value < i64::from(i32::MIN) || value > i64::from(i32::MAX) {
			return Err(BufferError::LebOverflow { at });
		}
		self.pos += width;
		Ok((value as i32, width))
	}

	/// Reads a signed LEB128 of at most 10 bytes.
	pub fn read_i64_leb(&mut self) -> Result<(i64, usize), BufferError> {
		let (value, width) = self.read_signed_leb()?;
		self.pos += width;
		Ok((value, width))
	}

	fn read_unsigned_leb(&self) -> Result<(u64, usize), BufferError> {
		let mut rest = &self.bytes[self.pos..];
		let before = rest.len();
		let value = leb128::read::unsigned(&mut rest).map_err(|err| self.leb_error(err))?;
		Ok((value, before - rest.len()))
	}

	fn read_signed_leb(&self) -> Result<(i64, usize), BufferError> {
		let mut rest = &self.bytes[self.pos..];
		let before = rest.len();
		let value = leb128::read::signed(&mut rest).map_err(|err| self.leb_error(err))?;
		Ok((value, before - rest.len()))
	}

	fn leb_error(&self, err: leb128::read::Error) -> BufferError {
		match err {
			leb128::read::Error::Overflow => BufferError::LebOverflow { at: self.pos },
			leb128::read::Error::IoError(_) => BufferError::UnexpectedEnd { at: self.pos },
		}
	}
}

/// Encodes `value` as an unsigned LEB128 padded to exactly 4 bytes.
///
/// The continuation bit is forced on all but the last byte, so any value
/// below 2^28 round-trips through a normal LEB reader in exactly 4 bytes.
pub fn encode_u32_leb4(value: u32) -> [u8; 4] {
	debug_assert!(value < 1 << 28);
	[
		0x80 | (value & 0x7F) as u8,
		0x80 | ((value >> 7) & 0x7F) as u8,
		0x80 | ((value >> 14) & 0x7F) as u8,
		((value >> 21) & 0x7F) as u8,
	]
}

/// Encodes `value` as an unsigned LEB128 padded to exactly 5 bytes.
pub fn encode_u32_leb5(value: u32) -> [u8; 5] {
	[
		0x80 | (value & 0x7F) as u8,
		0x80 | ((value >> 7) & 0x7F) as u8,
		0x80 | ((value >> 14) & 0x7F) as u8,
		0x80 | ((value >> 21) & 0x7F) as u8,
		((value >> 28) & 0x7F) as u8,
	]
}

/// Encodes `value` as a signed LEB128 padded to exactly 4 bytes.
///
/// Only values representable in 28 bits survive the truncation, which covers
/// any PC delta inside a function body.
pub fn encode_i32_leb4(value: i32) -> [u8; 4] {
	debug_assert!((-(1 << 27)..1 << 27).contains(&value));
	let raw = value as u32;
	[
		0x80 | (raw & 0x7F) as u8,
		0x80 | ((raw >> 7) & 0x7F) as u8,
		0x80 | ((raw >> 14) & 0x7F) as u8,
		((raw >> 21) & 0x7F) as u8,
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_width_reads() {
		let bytes = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_u32_le(), Ok(0x6D73_6100));
		assert_eq!(buf.read_u32_le(), Ok(1));
		assert!(buf.is_at_end());
		assert_eq!(buf.read_u8(), Err(BufferError::UnexpectedEnd { at: 8 }));
	}

	#[test]
	fn unsigned_leb_widths() {
		let bytes = [
			0x03, // 3 in one byte
			0xE5, 0x8E, 0x26, // 624485 in three bytes
			0x83, 0x80, 0x80, 0x80, 0x00, // 3 padded to five bytes
		];
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_u32_leb(), Ok((3, 1)));
		assert_eq!(buf.read_u32_leb(), Ok((624_485, 3)));
		assert_eq!(buf.read_u32_leb(), Ok((3, 5)));
	}

	#[test]
	fn signed_leb_sign_extension() {
		let bytes = [
			0x7F, // -1
			0x40, // -64 (the empty block type)
			0xC0, 0xBB, 0x78, // -123456
		];
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_i32_leb(), Ok((-1, 1)));
		assert_eq!(buf.read_i32_leb(), Ok((-64, 1)));
		assert_eq!(buf.read_i32_leb(), Ok((-123_456, 3)));
	}

	#[test]
	fn overlong_leb_rejected() {
		// six continuation bytes is more than a u32 may occupy
		let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_u32_leb(), Err(BufferError::LebOverflow { at: 0 }));
	}

	#[test]
	fn truncated_leb_rejected() {
		let bytes = [0xE5, 0x8E]; // continuation bit set on the last byte
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_u32_leb(), Err(BufferError::UnexpectedEnd { at: 0 }));
	}

	#[test]
	fn borrowed_bytes_do_not_copy() {
		let bytes = [1, 2, 3, 4, 5];
		let mut buf = WasmBuffer::new(&bytes);
		let head = buf.read_bytes(2).unwrap();
		assert_eq!(head, &bytes[..2]);
		assert_eq!(buf.pos(), 2);
		assert!(buf.read_bytes(4).is_err());
	}

	#[test]
	fn padded_encodings_round_trip() {
		for value in [0u32, 1, 63, 64, 1 << 20, (1 << 28) - 1] {
			let enc = encode_u32_leb4(value);
			let mut buf = WasmBuffer::new(&enc);
			assert_eq!(buf.read_u32_leb(), Ok((value, 4)));

			let enc = encode_u32_leb5(value);
			let mut buf = WasmBuffer::new(&enc);
			assert_eq!(buf.read_u32_leb(), Ok((value, 5)));
		}
		for value in [0i32, 1, -1, 63, -64, 1 << 20, -(1 << 27), (1 << 27) - 1] {
			let enc = encode_i32_leb4(value);
			let mut buf = WasmBuffer::new(&enc);
			assert_eq!(buf.read_i32_leb(), Ok((value, 4)));
		}
	}

	#[test]
	fn f64_little_endian() {
		let bytes = 1.5f64.to_le_bytes();
		let mut buf = WasmBuffer::new(&bytes);
		assert_eq!(buf.read_f64_le(), Ok(1.5));
	}
}
