//! Slot store state machine for one calculation run.

use tokio::sync::mpsc;

use ratesheet_types::{ProgramDescriptor, ProgramResult, RunGeneration};

/// Lifecycle of one program's result within a run.
///
/// Transitions: Pending -> Loaded | Failed. A slot never moves back to
/// Pending; a new run replaces the whole store instead.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Pending,
    Loaded(ProgramResult),
    Failed,
}

impl SlotState {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn as_loaded(&self) -> Option<&ProgramResult> {
        match self {
            Self::Loaded(result) => Some(result),
            Self::Pending | Self::Failed => None,
        }
    }
}

/// Position-stable container for one program's result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSlot {
    position: usize,
    descriptor: ProgramDescriptor,
    state: SlotState,
}

impl ResultSlot {
    /// Position is fixed at allocation and never changes afterwards.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn descriptor(&self) -> &ProgramDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> &SlotState {
        &self.state
    }
}

/// Result payload of one completed dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Loaded(ProgramResult),
    Failed,
}

/// One dispatch completion, tagged with the generation it was launched under.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotUpdate {
    pub generation: RunGeneration,
    pub position: usize,
    pub outcome: SlotOutcome,
}

/// Ordered per-program result containers for the current run.
///
/// Stores are fully replaced per run, never mutated across runs; the
/// generation ties updates back to the run that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotStore {
    generation: RunGeneration,
    slots: Vec<ResultSlot>,
}

impl SlotStore {
    /// The store that exists before any run: empty, generation zero.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            generation: RunGeneration::new(0),
            slots: Vec::new(),
        }
    }

    /// Allocate pending slots, one per descriptor, in descriptor order.
    #[must_use]
    pub(crate) fn new(generation: RunGeneration, descriptors: Vec<ProgramDescriptor>) -> Self {
        let slots = descriptors
            .into_iter()
            .enumerate()
            .map(|(position, descriptor)| ResultSlot {
                position,
                descriptor,
                state: SlotState::Pending,
            })
            .collect();
        Self { generation, slots }
    }

    #[must_use]
    pub fn generation(&self) -> RunGeneration {
        self.generation
    }

    #[must_use]
    pub fn slots(&self) -> &[ResultSlot] {
        &self.slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// A run is complete when every slot is Loaded or Failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|slot| !slot.state.is_pending())
    }

    /// Write a result into the slot at `position`. Returns false when the
    /// position is out of range for this store.
    pub(crate) fn write(&mut self, position: usize, outcome: SlotOutcome) -> bool {
        let Some(slot) = self.slots.get_mut(position) else {
            return false;
        };
        slot.state = match outcome {
            SlotOutcome::Loaded(result) => SlotState::Loaded(result),
            SlotOutcome::Failed => SlotState::Failed,
        };
        true
    }
}

/// Receiving end of one run's slot updates.
///
/// The channel closes once every dispatch task has reported; a run whose
/// program list was empty yields a handle that is already closed.
#[derive(Debug)]
pub struct RunHandle {
    generation: RunGeneration,
    receiver: mpsc::Receiver<SlotUpdate>,
}

impl RunHandle {
    pub(crate) fn new(generation: RunGeneration, receiver: mpsc::Receiver<SlotUpdate>) -> Self {
        Self {
            generation,
            receiver,
        }
    }

    #[must_use]
    pub fn generation(&self) -> RunGeneration {
        self.generation
    }

    /// Next slot update, or `None` once all dispatches have reported.
    pub async fn recv(&mut self) -> Option<SlotUpdate> {
        self.receiver.recv().await
    }
}
