//! The loop board: a fixed grid of loop slots shared with the session.

use crate::config::RecordOptions;
use crate::error::{Error, Result};
use crate::player::{LoopPosition, NetworkedLoop, SessionApi};
use crate::system::EngineHandles;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default number of loop slots.
pub const BOARD_CAPACITY: usize = 6;

/// Fixed-capacity collection of loops.
///
/// Each slot holds at most one loop. Recording into an occupied slot
/// replaces its loop; replacement and deletion stop playback first so a
/// dropped loop never keeps sounding.
pub struct LoopBoard {
    handles: EngineHandles,
    api: Option<Arc<dyn SessionApi>>,
    slots: Mutex<Vec<Option<Arc<NetworkedLoop>>>>,
}

impl LoopBoard {
    pub fn new(handles: EngineHandles, api: Option<Arc<dyn SessionApi>>) -> Self {
        Self::with_capacity(handles, api, BOARD_CAPACITY)
    }

    pub fn with_capacity(
        handles: EngineHandles,
        api: Option<Arc<dyn SessionApi>>,
        capacity: usize,
    ) -> Self {
        Self {
            handles,
            api,
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        let capacity = self.capacity();
        if slot >= capacity {
            return Err(Error::BoardSlot {
                index: slot,
                capacity,
            });
        }
        Ok(())
    }

    /// Schedule a recording into `slot` on the next transport boundary.
    ///
    /// Fails if another session already holds the recorders; in that
    /// case the slot's existing loop is untouched.
    pub fn record_at(
        &self,
        slot: usize,
        opts: RecordOptions,
        start_immediately: bool,
        position: LoopPosition,
    ) -> Result<Arc<NetworkedLoop>> {
        self.check_slot(slot)?;
        if self.handles.recording.is_locked() {
            return Err(Error::RecorderBusy);
        }

        let loop_ = NetworkedLoop::record(
            &self.handles,
            opts,
            start_immediately,
            position,
            self.api.clone(),
        )?;

        let previous = {
            let mut slots = self.slots.lock();
            slots[slot].replace(Arc::clone(&loop_))
        };
        if let Some(previous) = previous {
            previous.delete();
        }
        Ok(loop_)
    }

    pub fn get(&self, slot: usize) -> Option<Arc<NetworkedLoop>> {
        self.slots.lock().get(slot).cloned().flatten()
    }

    /// Remove the loop in `slot`, stopping it first.
    pub fn delete(&self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        let removed = self.slots.lock()[slot].take();
        if let Some(removed) = removed {
            removed.delete();
        }
        Ok(())
    }

    /// Stop every loop on the board; the loops stay in their slots.
    pub fn stop_all(&self) {
        let loops: Vec<_> = self.slots.lock().iter().flatten().cloned().collect();
        for loop_ in loops {
            loop_.stop();
        }
    }

    /// Snapshot of the occupied slots.
    pub fn loops(&self) -> Vec<(usize, Arc<NetworkedLoop>)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.clone().map(|loop_| (index, loop_)))
            .collect()
    }
}
