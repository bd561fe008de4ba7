//! Slab heap for objects and environments.
//!
//! Cells are stamped with the allocation count at birth so that unwinding a
//! protected scope can free exactly the unreachable cells created inside it.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    bytecode::FunctionProto,
    environment::Environment,
    value::{NativeFunction, Value},
};

/// Handle to a heap cell. Handles are not roots: a value held only by the
/// host may be freed by the next collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GcRef(u32);

impl GcRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub proto: Rc<FunctionProto>,
    pub env: GcRef,
}

#[derive(Debug, Clone)]
pub enum ObjectClass {
    Plain,
    Error,
    Closure(Closure),
    Native(NativeFunction),
}

#[derive(Debug, Clone)]
pub struct Object {
    pub class: ObjectClass,
    pub prototype: Option<GcRef>,
    pub properties: IndexMap<String, Value>,
}

impl Object {
    pub fn new(class: ObjectClass, prototype: Option<GcRef>) -> Self {
        Self {
            class,
            prototype,
            properties: IndexMap::new(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.class, ObjectClass::Closure(_) | ObjectClass::Native(_))
    }
}

#[derive(Debug)]
pub enum HeapCell {
    Object(Object),
    Environment(Environment),
}

#[derive(Debug)]
struct Slot {
    mark: u32,
    born: u64,
    cell: HeapCell,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    epoch: u32,
    born: u64,
    live: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            epoch: 1,
            born: 0,
            live: 0,
        }
    }

    /// Current mark generation. Starts at 1 and advances once per collection.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Number of cells allocated so far; cells born at or after a mark are
    /// "younger" than it.
    pub fn allocation_mark(&self) -> u64 {
        self.born
    }

    pub fn live_cells(&self) -> usize {
        self.live
    }

    pub fn alloc(&mut self, cell: HeapCell) -> GcRef {
        let slot = Slot {
            mark: self.epoch,
            born: self.born,
            cell,
        };
        self.born += 1;
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            GcRef(index)
        } else {
            self.slots.push(Some(slot));
            GcRef((self.slots.len() - 1) as u32)
        }
    }

    pub fn alloc_object(&mut self, object: Object) -> GcRef {
        self.alloc(HeapCell::Object(object))
    }

    pub fn contains(&self, cell: GcRef) -> bool {
        matches!(self.slots.get(cell.index()), Some(Some(_)))
    }

    fn cell(&self, cell: GcRef) -> Option<&HeapCell> {
        self.slots
            .get(cell.index())
            .and_then(|slot| slot.as_ref())
            .map(|slot| &slot.cell)
    }

    fn cell_mut(&mut self, cell: GcRef) -> Option<&mut HeapCell> {
        self.slots
            .get_mut(cell.index())
            .and_then(|slot| slot.as_mut())
            .map(|slot| &mut slot.cell)
    }

    pub fn object(&self, obj: GcRef) -> Option<&Object> {
        match self.cell(obj) {
            Some(HeapCell::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub fn object_mut(&mut self, obj: GcRef) -> Option<&mut Object> {
        match self.cell_mut(obj) {
            Some(HeapCell::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub fn environment(&self, env: GcRef) -> Option<&Environment> {
        match self.cell(env) {
            Some(HeapCell::Environment(environment)) => Some(environment),
            _ => None,
        }
    }

    /// Full collection: frees every cell unreachable from `roots`.
    pub fn collect(&mut self, roots: &[GcRef]) -> usize {
        self.collect_since(0, roots)
    }

    /// Frees unreachable cells born at or after `since`. Older cells are
    /// marked but never swept by this call.
    pub fn collect_since(&mut self, since: u64, roots: &[GcRef]) -> usize {
        self.epoch = self.epoch.wrapping_add(1).max(1);
        let epoch = self.epoch;

        let mut pending: Vec<GcRef> = roots.to_vec();
        while let Some(next) = pending.pop() {
            let Some(Some(slot)) = self.slots.get_mut(next.index()) else {
                continue;
            };
            if slot.mark == epoch {
                continue;
            }
            slot.mark = epoch;
            match &slot.cell {
                HeapCell::Object(object) => {
                    pending.extend(object.prototype);
                    pending.extend(object.properties.values().filter_map(Value::as_object));
                    if let ObjectClass::Closure(closure) = &object.class {
                        pending.push(closure.env);
                    }
                }
                HeapCell::Environment(environment) => {
                    pending.push(environment.variables);
                    pending.extend(environment.outer);
                }
            }
        }

        let mut freed = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let sweep = matches!(entry, Some(slot) if slot.mark != epoch && slot.born >= since);
            if sweep {
                *entry = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }
}
