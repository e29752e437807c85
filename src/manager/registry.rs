use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::TickerConfig;
use crate::worker::WorkerExit;

/// A running worker and the means to stop it
pub struct WorkerHandle {
    pub config: Arc<TickerConfig>,
    pub cancel: CancellationToken,
    pub nudge: Arc<Notify>,
    pub join: JoinHandle<WorkerExit>,
    pub generation: u64,
}

/// What currently occupies an id
pub enum Slot {
    Vacant,
    /// Publisher connect failed; a retry is queued under `generation`
    Pending {
        config: Arc<TickerConfig>,
        attempt: u32,
        generation: u64,
    },
    Live(WorkerHandle),
}

impl Slot {
    pub fn is_vacant(&self) -> bool {
        matches!(self, Slot::Vacant)
    }

    pub fn config(&self) -> Option<&Arc<TickerConfig>> {
        match self {
            Slot::Vacant => None,
            Slot::Pending { config, .. } => Some(config),
            Slot::Live(handle) => Some(&handle.config),
        }
    }

    pub fn take(&mut self) -> Slot {
        std::mem::replace(self, Slot::Vacant)
    }
}

struct Cell {
    slot: Slot,
    /// Set once the cell has left the map; lockers must look it up again
    retired: bool,
}

type Cells = DashMap<String, Arc<Mutex<Cell>>>;

/// Per-id mutual exclusion over ticker slots.
///
/// Every lifecycle operation on an id holds that id's lock for its whole
/// duration, so create, delete and restart on one id are serialized while
/// different ids proceed in parallel. Vacant cells are dropped from the map
/// when their guard is released.
#[derive(Default)]
pub struct Registry {
    cells: Arc<Cells>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &str) -> SlotGuard {
        loop {
            let cell = self
                .cells
                .entry(id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Cell {
                        slot: Slot::Vacant,
                        retired: false,
                    }))
                })
                .clone();

            let guard = cell.clone().lock_owned().await;
            if guard.retired {
                continue;
            }
            return SlotGuard {
                id: id.to_string(),
                cells: self.cells.clone(),
                cell,
                guard,
            };
        }
    }

    /// Ids with a cell, including ones momentarily vacant
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cells.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Exclusive access to one id's slot
pub struct SlotGuard {
    id: String,
    cells: Arc<Cells>,
    cell: Arc<Mutex<Cell>>,
    guard: OwnedMutexGuard<Cell>,
}

impl SlotGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Deref for SlotGuard {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.guard.slot
    }
}

impl DerefMut for SlotGuard {
    fn deref_mut(&mut self) -> &mut Slot {
        &mut self.guard.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.guard.slot.is_vacant() {
            self.guard.retired = true;
            let cell = &self.cell;
            self.cells.remove_if(&self.id, |_, current| Arc::ptr_eq(current, cell));
        }
    }
}
