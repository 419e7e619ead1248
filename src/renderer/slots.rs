//! The descriptor slot contract shared between the host and the shaders.
//!
//! The scene descriptor set is laid out as one numbered table: a handful of
//! fixed slots up front, then an append-only region handing out one
//! (index, vertex, material index) buffer triple per geometry object. The
//! shaders address the per-object buffers by `slot - GEOMETRY_SLOTS_START`,
//! so both sides must agree on this enumeration exactly.

use thiserror::Error;

/// Total number of slots the table can hand out.
pub const TABLE_CAPACITY: u32 = 200;

pub const OUTPUT_TARGET_SLOT: u32 = 0;
pub const TLAS_SLOT: u32 = 1;
pub const POINT_LIGHTS_SLOT: u32 = 2;
pub const MATERIALS_SLOT: u32 = 3;
/// First slot of the per-object region.
pub const GEOMETRY_SLOTS_START: u32 = 4;

#[derive(Debug, Error)]
#[error("slot table is full ({TABLE_CAPACITY} slots)")]
pub struct SlotTableFull;

/// The buffer slots of one geometry object, always allocated together and
/// in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySlots {
    pub index_buffer: u32,
    pub vertex_buffer: u32,
    pub material_index_buffer: u32,
}

impl GeometrySlots {
    /// The shader-side array index of this object's buffers.
    pub fn array_offset(&self) -> u32 {
        self.index_buffer - GEOMETRY_SLOTS_START
    }
}

/// Append-only slot allocator. Slots are never reused; a scene that does
/// not fit the table is rejected.
pub struct SlotTable {
    next: u32,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            next: GEOMETRY_SLOTS_START,
        }
    }

    pub fn allocate(&mut self) -> Result<u32, SlotTableFull> {
        if self.next >= TABLE_CAPACITY {
            return Err(SlotTableFull);
        }
        let slot = self.next;
        self.next += 1;
        Ok(slot)
    }

    pub fn allocate_geometry(&mut self) -> Result<GeometrySlots, SlotTableFull> {
        if self.next + 3 > TABLE_CAPACITY {
            return Err(SlotTableFull);
        }
        Ok(GeometrySlots {
            index_buffer: self.allocate().unwrap(),
            vertex_buffer: self.allocate().unwrap(),
            material_index_buffer: self.allocate().unwrap(),
        })
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_objects_get_the_documented_slots() {
        let mut table = SlotTable::new();
        let first = table.allocate_geometry().unwrap();
        let second = table.allocate_geometry().unwrap();

        assert_eq!(first.index_buffer, 4);
        assert_eq!(first.vertex_buffer, 5);
        assert_eq!(first.material_index_buffer, 6);
        assert_eq!(first.array_offset(), 0);

        assert_eq!(second.index_buffer, 7);
        assert_eq!(second.array_offset(), 3);
    }

    #[test]
    fn allocations_never_collide() {
        let mut table = SlotTable::new();
        let mut seen = std::collections::HashSet::new();
        while let Ok(slots) = table.allocate_geometry() {
            assert!(seen.insert(slots.index_buffer));
            assert!(seen.insert(slots.vertex_buffer));
            assert!(seen.insert(slots.material_index_buffer));
        }
        for slot in seen {
            assert!((GEOMETRY_SLOTS_START..TABLE_CAPACITY).contains(&slot));
        }
    }

    #[test]
    fn exhaustion_is_deterministic() {
        let mut table = SlotTable::new();
        let triples = (TABLE_CAPACITY - GEOMETRY_SLOTS_START) / 3;
        for _ in 0..triples {
            table.allocate_geometry().unwrap();
        }
        assert!(table.allocate_geometry().is_err());
        // Stays exhausted.
        assert!(table.allocate_geometry().is_err());
    }
}
