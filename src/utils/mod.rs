//! Internal building blocks shared by the executor and the timer.

mod parker;
mod slab;

pub(crate) use parker::Parker;
pub(crate) use slab::Slab;
