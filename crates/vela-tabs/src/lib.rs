//! Vela tab management
//!
//! The authoritative store of open browsing tabs, their order, selection,
//! and lifecycle. All mutation flows through one serialized command channel
//! (`TabStateStore`); persistence is abstracted behind `TabRepository`, and
//! UI layers observe changes through detachable `TabObserver` listeners.

mod command;
mod error;
mod observer;
mod policy;
mod repository;
mod state;
mod store;
mod tab;

pub use command::{Command, Execution, Outcome};
pub use error::TabError;
pub use observer::{ObserverRegistry, Subscription, TabObserver};
pub use policy::{AddPosition, AddSpeed, NearbySelection, PositioningPolicy, SelectionStrategy};
pub use repository::{InMemoryTabRepository, RepositoryError, RepositoryResult, TabRepository};
pub use state::TabList;
pub use store::{HydrationPolicy, TabStateStore};
pub use tab::{ContentType, SitePage, Tab, TabId};

pub type Result<T> = std::result::Result<T, TabError>;
