//! Session registry, output history and lifecycle

mod lifecycle;
mod registry;
mod scrollback;

pub use lifecycle::{LifecycleManager, TerminationReason};
pub use registry::{
    SessionHandle, SessionRegistry, ViewerId, ViewerSender, VIEWER_QUEUE_CAPACITY,
};
pub use scrollback::Scrollback;
