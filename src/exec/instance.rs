use crate::exec::error::Trap;
use crate::exec::value::Value;
use crate::parse::Module;

/// Size of one page of linear memory.
pub const PAGE_SIZE: usize = 65536;

/// A module in execution: linear memory, the function table and the mutable
/// globals, initialized from the module's declarations.
#[derive(Debug)]
pub struct Instance {
	pub memory: Vec<u8>,
	/// Function indices; `None` for never-initialized elements.
	pub table: Vec<Option<u32>>,
	pub globals: Vec<Value>,
}

impl Instance {
	pub fn new(module: &Module) -> Result<Instance, Trap> {
		let pages = module.memory.map(|limits| limits.initial as usize).unwrap_or(0);
		let mut memory = vec![0u8; pages * PAGE_SIZE];
		for segment in &module.data {
			let data = &module.bytes[segment.bytes.clone()];
			let start = segment.mem_offset as usize;
			let dest = memory
				.get_mut(start..start + data.len())
				.ok_or(Trap::MemoryOutOfBounds { addr: start })?;
			dest.copy_from_slice(data);
		}

		let slots = module.table.map(|table| table.limits.initial as usize).unwrap_or(0);
		let mut table = vec![None; slots];
		for segment in &module.elems {
			for (i, &func_index) in segment.func_indices.iter().enumerate() {
				let index = segment.table_offset as usize + i;
				let slot = table.get_mut(index).ok_or(Trap::TableOutOfBounds {
					index: index as u32,
				})?;
				*slot = Some(func_index);
			}
		}

		let globals = module.globals.iter().map(|global| global.init.clone()).collect();

		Ok(Instance {
			memory,
			table,
			globals,
		})
	}
}
