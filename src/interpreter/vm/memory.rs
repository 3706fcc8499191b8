//! Segmented slot memory.
//!
//! Address 0 is never valid. The address space is split into four contiguous
//! regions whose bounds come from [`Limits`]:
//!
//! ```text
//! [1, G)          globals
//! [G, F)          call frames (return address, saved fp, function id)
//! [F, S)          data stack (function locals and psh/pop)
//! [S, S + max)    heap, valid only inside live allocations
//! ```
//!
//! With the default limits: globals `[1, 201)`, frames `[201, 5201)`,
//! stack `[5201, 5501)`, heap from 5501 with 6000 slots mapped up front.

use crate::config::Limits;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::vm::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Global,
    Frame,
    Stack,
    Heap,
}

/// Region bounds, as half-open address ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub global_start: usize,
    pub frame_start: usize,
    pub stack_start: usize,
    pub heap_start: usize,
    pub heap_end: usize,
}

impl Layout {
    /// Saturates instead of overflowing; [`Limits::validate`] rejects such limits.
    pub fn new(limits: &Limits) -> Self {
        let global_start: usize = 1;
        let frame_start = global_start.saturating_add(limits.globals);
        let stack_start = frame_start.saturating_add(limits.frames);
        let heap_start = stack_start.saturating_add(limits.stack);
        Self {
            global_start,
            frame_start,
            stack_start,
            heap_start,
            heap_end: heap_start.saturating_add(limits.max_heap),
        }
    }

    /// Region an address falls in, `None` outside every region.
    pub fn region_of(&self, addr: usize) -> Option<Region> {
        match addr {
            a if a < self.global_start => None,
            a if a < self.frame_start => Some(Region::Global),
            a if a < self.stack_start => Some(Region::Frame),
            a if a < self.heap_start => Some(Region::Stack),
            a if a < self.heap_end => Some(Region::Heap),
            _ => None,
        }
    }
}

/// Heap slots with a first-fit allocator.
///
/// `slots` is the mapped extent; it grows on demand up to `limit` and shrinks
/// back (never below `initial`) once the top of the heap is freed.
struct Heap {
    slots: Vec<Value>,
    /// Live allocations, start offset to length.
    allocations: BTreeMap<usize, usize>,
    initial: usize,
    limit: usize,
}

impl Heap {
    fn new(initial: usize, limit: usize) -> Self {
        Self {
            slots: vec![Value::default(); initial],
            allocations: BTreeMap::new(),
            initial,
            limit,
        }
    }

    /// End of the highest live allocation.
    fn high_water(&self) -> usize {
        self.allocations
            .last_key_value()
            .map_or(0, |(start, len)| start + len)
    }

    fn allocate(&mut self, size: usize) -> Result<usize, RuntimeError> {
        let mut cursor = 0;
        for (&start, &len) in &self.allocations {
            if start - cursor >= size {
                return Ok(self.claim(cursor, size));
            }
            cursor = start + len;
        }

        let needed = cursor
            .checked_add(size)
            .filter(|needed| *needed <= self.limit)
            .ok_or(RuntimeError::OutOfMemory {
                requested: size,
                limit: self.limit,
            })?;
        if needed > self.slots.len() {
            let grown = (self.slots.len() * 2).max(needed).min(self.limit);
            self.slots.resize(grown, Value::default());
        }
        Ok(self.claim(cursor, size))
    }

    fn claim(&mut self, start: usize, size: usize) -> usize {
        self.slots[start..start + size].fill(Value::default());
        self.allocations.insert(start, size);
        start
    }

    fn free(&mut self, offset: usize) -> bool {
        if self.allocations.remove(&offset).is_none() {
            return false;
        }
        let high = self.high_water();
        let mut mapped = self.slots.len();
        while mapped / 2 >= self.initial && high <= mapped / 2 {
            mapped /= 2;
        }
        self.slots.truncate(mapped);
        true
    }

    fn is_live(&self, offset: usize) -> bool {
        self.allocations
            .range(..=offset)
            .next_back()
            .is_some_and(|(start, len)| offset < start + len)
    }
}

/// The whole addressable memory of one engine.
pub struct Memory {
    layout: Layout,
    /// Globals, frames and stack: addresses `[1, heap_start)`.
    fixed: Vec<Value>,
    heap: Heap,
}

impl Memory {
    pub fn new(limits: &Limits) -> Self {
        let layout = Layout::new(limits);
        Self {
            fixed: vec![Value::default(); layout.heap_start - layout.global_start],
            heap: Heap::new(limits.initial_heap, limits.max_heap),
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of heap slots currently mapped.
    pub fn heap_mapped(&self) -> usize {
        self.heap.slots.len()
    }

    /// Number of live heap allocations.
    pub fn allocations(&self) -> usize {
        self.heap.allocations.len()
    }

    /// Converts a computed address to a slot address.
    pub fn address(&self, raw: i64) -> Result<usize, RuntimeError> {
        usize::try_from(raw)
            .ok()
            .filter(|addr| self.layout.region_of(*addr).is_some())
            .ok_or(RuntimeError::InvalidMemoryAccess { address: raw })
    }

    fn invalid(addr: usize) -> RuntimeError {
        RuntimeError::InvalidMemoryAccess {
            address: addr as i64,
        }
    }

    pub fn read(&self, addr: usize) -> Result<&Value, RuntimeError> {
        match self.layout.region_of(addr) {
            None => Err(Self::invalid(addr)),
            Some(Region::Heap) => {
                let offset = addr - self.layout.heap_start;
                if !self.heap.is_live(offset) {
                    return Err(Self::invalid(addr));
                }
                Ok(&self.heap.slots[offset])
            }
            Some(_) => Ok(&self.fixed[addr - self.layout.global_start]),
        }
    }

    pub fn write(&mut self, addr: usize, value: Value) -> Result<(), RuntimeError> {
        let slot = match self.layout.region_of(addr) {
            None => return Err(Self::invalid(addr)),
            Some(Region::Heap) => {
                let offset = addr - self.layout.heap_start;
                if !self.heap.is_live(offset) {
                    return Err(Self::invalid(addr));
                }
                &mut self.heap.slots[offset]
            }
            Some(_) => &mut self.fixed[addr - self.layout.global_start],
        };
        *slot = value;
        Ok(())
    }

    /// Allocates `size` zeroed heap slots and returns the base address.
    pub fn allocate(&mut self, size: usize) -> Result<usize, RuntimeError> {
        let offset = self.heap.allocate(size)?;
        Ok(self.layout.heap_start + offset)
    }

    /// Frees the allocation starting at `addr`.
    ///
    /// Returns [`RuntimeError::InvalidMemoryAccess`] if `addr` is not the start of a live allocation.
    pub fn free(&mut self, addr: usize) -> Result<(), RuntimeError> {
        let freed = self.layout.region_of(addr) == Some(Region::Heap)
            && self.heap.free(addr - self.layout.heap_start);
        if freed { Ok(()) } else { Err(Self::invalid(addr)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Limits {
        Limits {
            globals: 4,
            frames: 6,
            stack: 4,
            initial_heap: 8,
            max_heap: 32,
        }
    }

    #[test]
    fn default_layout_bounds() {
        let layout = Layout::new(&Limits::default());
        assert_eq!(layout.region_of(0), None);
        assert_eq!(layout.region_of(1), Some(Region::Global));
        assert_eq!(layout.region_of(200), Some(Region::Global));
        assert_eq!(layout.region_of(201), Some(Region::Frame));
        assert_eq!(layout.region_of(5200), Some(Region::Frame));
        assert_eq!(layout.region_of(5201), Some(Region::Stack));
        assert_eq!(layout.region_of(5500), Some(Region::Stack));
        assert_eq!(layout.region_of(5501), Some(Region::Heap));
        assert_eq!(layout.region_of(5501 + (1 << 20)), None);
    }

    #[test]
    fn address_zero_is_invalid() {
        let mut memory = Memory::new(&small());
        assert!(memory.read(0).is_err());
        assert!(memory.write(0, Value::Int(1)).is_err());
        assert!(memory.address(0).is_err());
        assert!(memory.address(-5).is_err());
    }

    #[test]
    fn fixed_regions_default_to_zero() {
        let mut memory = Memory::new(&small());
        assert_eq!(memory.read(1), Ok(&Value::Int(0)));
        memory.write(14, Value::Str("top".into())).unwrap();
        assert_eq!(memory.read(14), Ok(&Value::Str("top".into())));
    }

    #[test]
    fn heap_valid_only_inside_allocations() {
        let mut memory = Memory::new(&small());
        let heap = memory.layout().heap_start;
        assert!(memory.read(heap).is_err());

        let base = memory.allocate(3).unwrap();
        assert_eq!(base, heap);
        memory.write(base + 2, Value::Int(7)).unwrap();
        assert_eq!(memory.read(base + 2), Ok(&Value::Int(7)));
        assert!(memory.read(base + 3).is_err());

        memory.free(base).unwrap();
        assert!(memory.read(base).is_err());
        assert!(memory.free(base).is_err());
    }

    #[test]
    fn first_fit_reuses_gaps() {
        let mut memory = Memory::new(&small());
        let a = memory.allocate(2).unwrap();
        let b = memory.allocate(2).unwrap();
        let c = memory.allocate(2).unwrap();
        assert_eq!((b - a, c - b), (2, 2));

        memory.free(b).unwrap();
        assert_eq!(memory.allocate(1).unwrap(), b);
        assert_eq!(memory.allocate(1).unwrap(), b + 1);
        assert_eq!(memory.allocate(1).unwrap(), c + 2);
    }

    #[test]
    fn free_requires_allocation_start() {
        let mut memory = Memory::new(&small());
        let base = memory.allocate(4).unwrap();
        assert!(memory.free(base + 1).is_err());
        assert!(memory.free(1).is_err());
        assert!(memory.free(base).is_ok());
    }

    #[test]
    fn heap_grows_and_shrinks() {
        let mut memory = Memory::new(&small());
        let a = memory.allocate(6).unwrap();
        let b = memory.allocate(10).unwrap();
        assert_eq!(memory.heap_mapped(), 16);
        memory.free(b).unwrap();
        assert_eq!(memory.heap_mapped(), 8);
        memory.free(a).unwrap();
        assert_eq!(memory.heap_mapped(), 8);
    }

    #[test]
    fn allocation_past_limit_fails() {
        let mut memory = Memory::new(&small());
        assert!(memory.allocate(32).is_ok());
        assert_eq!(
            memory.allocate(1),
            Err(RuntimeError::OutOfMemory {
                requested: 1,
                limit: 32
            })
        );
    }

    #[test]
    fn allocations_are_zeroed() {
        let mut memory = Memory::new(&small());
        let a = memory.allocate(2).unwrap();
        memory.write(a, Value::Int(9)).unwrap();
        memory.free(a).unwrap();
        let b = memory.allocate(2).unwrap();
        assert_eq!(memory.read(b), Ok(&Value::Int(0)));
    }
}
