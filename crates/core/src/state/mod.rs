pub mod archive;
pub mod db;

pub use archive::{ArchiveManager, InMemoryArchive, MissionArchive, MissionRecord};
pub use db::NexusDb;
