pub mod entry;
pub mod store;
pub mod version;

pub use entry::BinaryEntry;
pub use store::{materialize, VersionCatalog};
pub use version::compare_versions;
