//! Per-transaction evaluation state of a single node.
//!
//! Once a node leaves [`Mode::Uninitialized`] it is locked into exactly one
//! production mode for the rest of the transaction:
//!
//! - **local list**: the node builds its own append-only list of values,
//!   possibly across several phases;
//! - **aliased**: the node adopts an existing value without copying it;
//! - **forwarding**: the node's result is whatever another node produces.
//!
//! Local-list and aliased nodes can then be finished exactly once. Forwarding
//! nodes are never finished themselves; callers follow the chain instead.

use std::any::Any;
use std::fmt;

use crate::error::{EvalError, Result};
use crate::node::NodeIndex;
use crate::phase::Phase;
use crate::value::Value;

/// Production mode of a node for the current transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Uninitialized,
    LocalList,
    Forwarding(NodeIndex),
    Aliased,
}

/// Opaque slot an operator may use to keep bookkeeping between phases.
///
/// The evaluation core never looks inside.
#[derive(Default)]
pub struct StateSlot(Option<Box<dyn Any + Send>>);

impl StateSlot {
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut().and_then(|b| b.downcast_mut::<T>())
    }

    /// Returns the stored `T`, creating it with `f` if the slot is empty or
    /// holds some other type.
    pub fn get_or_insert_with<T: Any + Send>(&mut self, f: impl FnOnce() -> T) -> &mut T {
        if self.get::<T>().is_none() {
            self.0 = Some(Box::new(f()));
        }
        match self.0.as_mut().and_then(|b| b.downcast_mut::<T>()) {
            Some(value) => value,
            None => unreachable!("slot was just filled with this type"),
        }
    }

    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.0.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for StateSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("StateSlot(..)"),
            None => f.write_str("StateSlot(empty)"),
        }
    }
}

/// Evaluation record of one node for one transaction.
#[derive(Debug, Default)]
pub struct NodeEvalState {
    mode: Mode,
    finished: bool,
    value: Value,
    phase: Option<Phase>,
    state: StateSlot,
}

impl NodeEvalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_forwarding(&self) -> bool {
        matches!(self.mode, Mode::Forwarding(_))
    }

    pub fn is_aliased(&self) -> bool {
        self.mode == Mode::Aliased
    }

    pub fn is_local(&self) -> bool {
        self.mode == Mode::LocalList
    }

    pub fn forwarded_to(&self) -> Option<NodeIndex> {
        match self.mode {
            Mode::Forwarding(target) => Some(target),
            _ => None,
        }
    }

    /// The node's own value. Always null for forwarding and uninitialized
    /// nodes.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Starts (or continues) building a local list.
    ///
    /// Calling this again while already building a local list is a no-op and
    /// keeps the entries appended so far.
    pub fn setup_local_list(&mut self) -> Result<()> {
        if self.finished {
            return Err(EvalError::InvalidState("cannot set up local list on finished node"));
        }
        match self.mode {
            Mode::LocalList => Ok(()),
            Mode::Uninitialized => {
                self.mode = Mode::LocalList;
                self.value = Value::empty_list();
                Ok(())
            }
            Mode::Forwarding(_) => {
                Err(EvalError::InvalidState("cannot set up local list on forwarding node"))
            }
            Mode::Aliased => {
                Err(EvalError::InvalidState("cannot set up local list on aliased node"))
            }
        }
    }

    pub fn append_to_list(&mut self, value: Value) -> Result<()> {
        if self.mode != Mode::LocalList {
            return Err(EvalError::InvalidState("cannot append to node without local list"));
        }
        if self.finished {
            return Err(EvalError::InvalidState("cannot append to finished node"));
        }
        self.value.push(value);
        Ok(())
    }

    /// Declares this node's result to be that of `target`.
    pub fn forward(&mut self, target: NodeIndex) -> Result<()> {
        match self.mode {
            Mode::Uninitialized => {
                self.mode = Mode::Forwarding(target);
                Ok(())
            }
            Mode::Forwarding(_) => Err(EvalError::InvalidState("node is already forwarding")),
            _ => Err(EvalError::InvalidState("cannot forward node that already has a result mode")),
        }
    }

    pub fn alias(&mut self, value: Value) -> Result<()> {
        match self.mode {
            Mode::Uninitialized => {
                self.mode = Mode::Aliased;
                self.value = value;
                Ok(())
            }
            Mode::Aliased => Err(EvalError::InvalidState("node is already aliased")),
            _ => Err(EvalError::InvalidState("cannot alias node that already has a result mode")),
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(EvalError::InvalidState("node is already finished"));
        }
        match self.mode {
            Mode::LocalList | Mode::Aliased => {
                self.finished = true;
                Ok(())
            }
            Mode::Forwarding(_) => Err(EvalError::InvalidState("cannot finish forwarding node")),
            Mode::Uninitialized => {
                Err(EvalError::InvalidState("cannot finish node that has produced nothing"))
            }
        }
    }

    /// Finishes with a true result: aliases [`Value::true_value`] if nothing
    /// was produced yet, or appends it to the local list.
    pub fn finish_true(&mut self) -> Result<()> {
        match self.mode {
            Mode::Uninitialized => self.alias(Value::true_value())?,
            Mode::LocalList => self.append_to_list(Value::true_value())?,
            Mode::Aliased if !self.finished => {
                return Err(EvalError::InvalidState("cannot finish true on aliased node"))
            }
            _ => {}
        }
        self.finish()
    }

    /// Phase this node was last evaluated in, or [`Phase::None`].
    pub fn phase(&self) -> Phase {
        self.phase.unwrap_or_default()
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = Some(phase);
    }

    pub(crate) fn evaluated_in(&self, phase: Phase) -> bool {
        self.phase == Some(phase)
    }

    pub fn state(&self) -> &StateSlot {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateSlot {
        &mut self.state
    }
}
