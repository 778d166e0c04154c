use crate::exec::error::Trap;
use crate::exec::value::Value;
use tracing::trace;

/// A host function provided under the `"weewasm"` import module, identified
/// at bind time and invoked through the normal `call` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
	Puti,
	Putd,
	Puts,
}

impl Intrinsic {
	/// Binds a `"weewasm"` member name to its intrinsic.
	pub fn by_name(member: &str) -> Option<Intrinsic> {
		match member {
			"puti" => Some(Intrinsic::Puti),
			"putd" => Some(Intrinsic::Putd),
			"puts" => Some(Intrinsic::Puts),
			_ => None,
		}
	}

	/// Invokes the intrinsic. All three print to stdout without a trailing
	/// newline and return nothing.
	pub fn invoke(self, args: &[Value]) -> Result<Option<Value>, Trap> {
		trace!("intrinsic {:?}{:?}", self, args);
		match (self, args) {
			(Intrinsic::Puti, [Value::I32(value)]) => print!("{value}"),
			(Intrinsic::Putd, [Value::F64(value)]) => print!("{value:.6}"),
			(Intrinsic::Puts, [Value::ExternRef(None)]) => print!("null"),
			(Intrinsic::Puts, [Value::ExternRef(Some(string))]) => print!("{string}"),
			_ => {
				return Err(Trap::StackTypeMismatch {
					expected: self.arg_type(),
					got: "mismatched intrinsic argument",
				})
			}
		}
		Ok(None)
	}

	fn arg_type(self) -> &'static str {
		match self {
			Intrinsic::Puti => "i32",
			Intrinsic::Putd => "f64",
			Intrinsic::Puts => "externref",
		}
	}
}
