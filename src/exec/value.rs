use crate::exec::error::Trap;
use crate::parse::ValType;
use std::fmt;
use std::rc::Rc;

/// A runtime value. Every operand opcode is monomorphic over exactly one of
/// these variants; there are no implicit conversions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	I32(i32),
	F64(f64),
	/// An opaque reference, possibly null. The only producers are the CLI
	/// argument parser and `ref`-typed parameters, so the referent is a
	/// shared string.
	ExternRef(Option<Rc<str>>),
}

impl Value {
	pub fn null_ref() -> Value {
		Value::ExternRef(None)
	}

	/// The zero value a declared local of `val_type` starts with.
	pub fn default_for(val_type: ValType) -> Value {
		match val_type {
			ValType::F64 => Value::F64(0.0),
			ValType::ExternRef => Value::ExternRef(None),
			_ => Value::I32(0),
		}
	}

	/// Parses a command-line argument into a value.
	///
	/// A trailing `d`/`D` on a valid double literal makes an f64; a decimal
	/// or `0x` hex integer makes an i32 (wrapping); anything else becomes an
	/// externref holding the raw argument string.
	pub fn parse_arg(arg: &str) -> Value {
		if !arg.is_empty() {
			if arg.ends_with('d') || arg.ends_with('D') {
				if let Ok(value) = arg[..arg.len() - 1].parse::<f64>() {
					return Value::F64(value);
				}
			} else if let Some(hex) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
				if let Ok(value) = i64::from_str_radix(hex, 16) {
					return Value::I32(value as i32);
				}
			} else if let Ok(value) = arg.parse::<i64>() {
				return Value::I32(value as i32);
			}
		}
		Value::ExternRef(Some(Rc::from(arg)))
	}

	fn type_name(&self) -> &'static str {
		match self {
			Value::I32(_) => "i32",
			Value::F64(_) => "f64",
			Value::ExternRef(_) => "externref",
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::I32(value) => write!(f, "{value}"),
			Value::F64(value) => write!(f, "{value:.6}"),
			Value::ExternRef(None) => write!(f, "null"),
			Value::ExternRef(Some(string)) => write!(f, "{string}"),
		}
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Value {
		Value::I32(value)
	}
}

impl From<u32> for Value {
	fn from(value: u32) -> Value {
		Value::I32(value as i32)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Value {
		Value::F64(value)
	}
}

impl TryFrom<Value> for i32 {
	type Error = Trap;

	fn try_from(value: Value) -> Result<i32, Trap> {
		match value {
			Value::I32(value) => Ok(value),
			got => Err(Trap::StackTypeMismatch {
				expected: "i32",
				got: got.type_name(),
			}),
		}
	}
}

impl TryFrom<Value> for u32 {
	type Error = Trap;

	fn try_from(value: Value) -> Result<u32, Trap> {
		i32::try_from(value).map(|value| value as u32)
	}
}

impl TryFrom<Value> for f64 {
	type Error = Trap;

	fn try_from(value: Value) -> Result<f64, Trap> {
		match value {
			Value::F64(value) => Ok(value),
			got => Err(Trap::StackTypeMismatch {
				expected: "f64",
				got: got.type_name(),
			}),
		}
	}
}

impl TryFrom<Value> for Option<Rc<str>> {
	type Error = Trap;

	fn try_from(value: Value) -> Result<Option<Rc<str>>, Trap> {
		match value {
			Value::ExternRef(reference) => Ok(reference),
			got => Err(Trap::StackTypeMismatch {
				expected: "externref",
				got: got.type_name(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn argument_parsing() {
		assert_eq!(Value::parse_arg("42"), Value::I32(42));
		assert_eq!(Value::parse_arg("-7"), Value::I32(-7));
		assert_eq!(Value::parse_arg("0x10"), Value::I32(16));
		assert_eq!(Value::parse_arg("0xFFFFFFFF"), Value::I32(-1));
		assert_eq!(Value::parse_arg("2.5d"), Value::F64(2.5));
		assert_eq!(Value::parse_arg("-1e3D"), Value::F64(-1000.0));
		assert_eq!(
			Value::parse_arg("hello"),
			Value::ExternRef(Some(Rc::from("hello")))
		);
		// a malformed number falls back to a reference to the raw string
		assert_eq!(
			Value::parse_arg("3.5"),
			Value::ExternRef(Some(Rc::from("3.5")))
		);
		assert_eq!(Value::parse_arg(""), Value::ExternRef(Some(Rc::from(""))));
	}

	#[test]
	fn display_matches_runner_output() {
		assert_eq!(Value::I32(7).to_string(), "7");
		assert_eq!(Value::F64(7.0).to_string(), "7.000000");
		assert_eq!(Value::null_ref().to_string(), "null");
		assert_eq!(
			Value::ExternRef(Some(Rc::from("abc"))).to_string(),
			"abc"
		);
	}
}
