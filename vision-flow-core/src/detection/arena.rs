//! Arena storage for detections grouped by round and local index.

use super::Detection;
use std::ops::{Index, IndexMut};

/// Handle of a detection inside a [`DetectionArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetectionId(usize);

impl DetectionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Owns detections and hands out stable integer handles.
#[derive(Debug, Clone, Default)]
pub struct DetectionArena {
    items: Vec<Detection>,
}

impl DetectionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, detection: Detection) -> DetectionId {
        self.items.push(detection);
        DetectionId(self.items.len() - 1)
    }

    pub fn get(&self, id: DetectionId) -> Option<&Detection> {
        self.items.get(id.0)
    }

    pub fn get_mut(&mut self, id: DetectionId) -> Option<&mut Detection> {
        self.items.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DetectionId, &Detection)> {
        self.items.iter().enumerate().map(|(i, d)| (DetectionId(i), d))
    }
}

impl Index<DetectionId> for DetectionArena {
    type Output = Detection;

    fn index(&self, id: DetectionId) -> &Detection {
        &self.items[id.0]
    }
}

impl IndexMut<DetectionId> for DetectionArena {
    fn index_mut(&mut self, id: DetectionId) -> &mut Detection {
        &mut self.items[id.0]
    }
}

/// Handle of a [`Slot`] inside a [`ResultSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

/// The detections produced for one image in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub round: u32,
    pub local_index: u32,
    /// Tile position the image was cut from, if any.
    pub slice_index: Option<(u32, u32)>,
    members: Vec<DetectionId>,
}

impl Slot {
    pub fn members(&self) -> &[DetectionId] {
        &self.members
    }
}

/// Detections of a run, grouped into `(round, local_index)` slots.
///
/// A round is one pass of detection generation. Later rounds are seeded from
/// the survivors of earlier ones with [`ResultSet::advance_round`].
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    arena: DetectionArena,
    slots: Vec<Slot>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slot for one image of a round.
    pub fn add_slot(
        &mut self,
        round: u32,
        local_index: u32,
        slice_index: Option<(u32, u32)>,
    ) -> SlotId {
        self.slots.push(Slot {
            round,
            local_index,
            slice_index,
            members: Vec::new(),
        });
        SlotId(self.slots.len() - 1)
    }

    /// Adds a detection to a slot. The slot's tile position is copied onto
    /// the detection unless it already carries one.
    pub fn insert(&mut self, slot: SlotId, mut detection: Detection) -> DetectionId {
        let target = &mut self.slots[slot.0];
        if detection.meta.slice_index.is_none() {
            detection.meta.slice_index = target.slice_index;
        }
        let id = self.arena.push(detection);
        target.members.push(id);
        id
    }

    pub fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id.0]
    }

    /// Looks up the slot for `(round, local_index)`.
    pub fn find(&self, round: u32, local_index: u32) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.round == round && s.local_index == local_index)
            .map(SlotId)
    }

    /// Slots of a round in insertion order.
    pub fn slots_in_round(&self, round: u32) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.round == round)
            .map(|(i, s)| (SlotId(i), s))
    }

    /// Detections of one slot.
    pub fn detections(&self, slot: SlotId) -> impl Iterator<Item = (DetectionId, &Detection)> {
        self.slots[slot.0]
            .members
            .iter()
            .map(|&id| (id, &self.arena[id]))
    }

    /// Non-suppressed detections of a round, in slot order.
    pub fn survivors(&self, round: u32) -> Vec<DetectionId> {
        self.slots_in_round(round)
            .flat_map(|(_, s)| s.members.iter().copied())
            .filter(|&id| !self.arena[id].is_suppressed())
            .collect()
    }

    /// Highest round that has a slot.
    pub fn latest_round(&self) -> Option<u32> {
        self.slots.iter().map(|s| s.round).max()
    }

    /// Seeds round `round + 1` from the survivors of `round`.
    ///
    /// Each survivor gets its own slot, numbered consecutively, and its box is
    /// replaced by the recorded global box. Survivors without a box in
    /// original coordinates are left behind. Returns the new round.
    pub fn advance_round(&mut self, round: u32) -> u32 {
        let next = round + 1;
        let mut counter = 0u32;
        for id in self.survivors(round) {
            let source = &self.arena[id];
            let Some(global) = source.original_bbox() else {
                continue;
            };
            let mut carried = source.clone();
            carried.bbox = Some(global);
            carried.meta.global_bbox = Some(global);
            carried.meta.slice_index = None;
            let slot = self.add_slot(next, counter, None);
            self.insert(slot, carried);
            counter += 1;
        }
        next
    }

    pub fn detection(&self, id: DetectionId) -> &Detection {
        &self.arena[id]
    }

    pub fn detection_mut(&mut self, id: DetectionId) -> &mut Detection {
        &mut self.arena[id]
    }

    pub fn arena(&self) -> &DetectionArena {
        &self.arena
    }

    /// Consumes the set, returning the detections of `round` in slot order.
    pub fn into_round(self, round: u32) -> Vec<Detection> {
        let ids: Vec<DetectionId> = self
            .slots_in_round(round)
            .flat_map(|(_, s)| s.members.iter().copied())
            .collect();
        let mut items: Vec<Option<Detection>> = self.arena.items.into_iter().map(Some).collect();
        ids.into_iter().filter_map(|id| items[id.0].take()).collect()
    }
}
