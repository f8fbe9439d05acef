//! Plot model and versioned plot state.

pub mod model;
pub mod state;
pub mod update;

pub use model::{Axis, Layout, Plot, Trace};
pub use state::{PlotState, Subscription};
pub use update::{FieldPath, PlotPatch, UpdateEvent, UpdatePayload};
