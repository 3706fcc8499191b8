use crate::interpreter::errors::RuntimeError;
use crate::interpreter::program::FunctionId;
use crate::interpreter::vm::Value;
use crate::interpreter::vm::memory::Memory;

/// Call record kept in the frame region: three consecutive slots holding the
/// return address, the caller's frame pointer and the caller's function id
/// (-1 when the caller is top-level code or a label body).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct FrameRecord {
    pub return_pc: usize,
    pub saved_fp: usize,
    pub function: Option<FunctionId>,
}

impl FrameRecord {
    pub const SLOTS: usize = 3;

    pub fn store(&self, memory: &mut Memory, at: usize) -> Result<(), RuntimeError> {
        let function = self.function.map_or(-1, |id| id.0 as i64);
        memory.write(at, Value::Int(self.return_pc as i64))?;
        memory.write(at + 1, Value::Int(self.saved_fp as i64))?;
        memory.write(at + 2, Value::Int(function))
    }

    /// Reads the record at `at`. Programs can write into the frame region, so
    /// every field is checked: the saved frame pointer must lie in the stack
    /// region and the function id must name one of `functions` declared functions.
    pub fn load(memory: &Memory, at: usize, functions: usize) -> Result<Self, RuntimeError> {
        let corrupt = || RuntimeError::CorruptFrame { address: at };
        let layout = memory.layout();
        let slot = |offset: usize| -> Result<i64, RuntimeError> {
            match memory.read(at + offset)? {
                Value::Int(v) => Ok(*v),
                _ => Err(corrupt()),
            }
        };

        let return_pc = usize::try_from(slot(0)?).map_err(|_| corrupt())?;
        let saved_fp = usize::try_from(slot(1)?)
            .ok()
            .filter(|fp| (layout.stack_start..=layout.heap_start).contains(fp))
            .ok_or_else(corrupt)?;
        let function = match slot(2)? {
            -1 => None,
            id => Some(
                usize::try_from(id)
                    .ok()
                    .filter(|id| *id < functions)
                    .map(FunctionId)
                    .ok_or_else(corrupt)?,
            ),
        };
        Ok(Self {
            return_pc,
            saved_fp,
            function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    #[test]
    fn record_survives_store_and_load() {
        let mut memory = Memory::new(&Limits::default());
        let at = memory.layout().frame_start;
        let record = FrameRecord {
            return_pc: 12,
            saved_fp: 5201,
            function: Some(FunctionId(3)),
        };
        record.store(&mut memory, at).unwrap();
        assert_eq!(FrameRecord::load(&memory, at, 4), Ok(record));

        let label_call = FrameRecord {
            function: None,
            ..record
        };
        label_call.store(&mut memory, at + FrameRecord::SLOTS).unwrap();
        assert_eq!(
            FrameRecord::load(&memory, at + FrameRecord::SLOTS, 4),
            Ok(label_call)
        );
    }

    #[test]
    fn overwritten_record_is_corrupt() {
        let mut memory = Memory::new(&Limits::default());
        let at = memory.layout().frame_start;
        memory.write(at + 1, Value::Str("x".into())).unwrap();
        assert_eq!(
            FrameRecord::load(&memory, at, 4),
            Err(RuntimeError::CorruptFrame { address: at })
        );
    }

    #[test]
    fn out_of_range_fields_are_corrupt() {
        let mut memory = Memory::new(&Limits::default());
        let layout = *memory.layout();
        let at = layout.frame_start;
        let record = FrameRecord {
            return_pc: 0,
            saved_fp: layout.stack_start,
            function: Some(FunctionId(1)),
        };
        record.store(&mut memory, at).unwrap();
        assert!(FrameRecord::load(&memory, at, 2).is_ok());
        assert_eq!(
            FrameRecord::load(&memory, at, 1),
            Err(RuntimeError::CorruptFrame { address: at })
        );

        for fp in [0, layout.global_start, layout.heap_start + 1] {
            memory.write(at + 1, Value::Int(fp as i64)).unwrap();
            assert_eq!(
                FrameRecord::load(&memory, at, 2),
                Err(RuntimeError::CorruptFrame { address: at }),
                "saved fp {fp}"
            );
        }

        memory.write(at + 1, Value::Int(layout.stack_start as i64)).unwrap();
        memory.write(at + 2, Value::Int(-2)).unwrap();
        assert!(FrameRecord::load(&memory, at, 2).is_err());
    }
}
