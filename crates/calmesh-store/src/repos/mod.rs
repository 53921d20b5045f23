//! Repositories, one per domain

mod auth;
mod channels;
mod constraints;
mod events;
mod history;
mod journal;
mod mirrors;
mod policies;
mod registry;
mod sessions;
mod sync_state;

pub use auth::AuthRepo;
pub use channels::ChannelRepo;
pub use constraints::ConstraintRepo;
pub use events::{EventListPage, EventRepo};
pub use history::HistoryRepo;
pub use journal::JournalRepo;
pub use mirrors::{MirrorCounts, MirrorRepo};
pub use policies::PolicyRepo;
pub use registry::RegistryRepo;
pub use sessions::SessionRepo;
pub use sync_state::SyncStateRepo;
