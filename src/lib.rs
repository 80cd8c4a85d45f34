pub mod codec;
pub mod config;
pub mod error;
pub mod list;
pub mod logging;
pub mod overlay;

pub use codec::{load_from_path, read_registry, save_to_path, write_registry};

pub use config::get_config_path;
pub use config::load_config;
pub use config::save_config;
pub use config::MemoryConfig;
pub use config::PersistenceConfig;
pub use config::StoreConfig;

pub use error::{OvlError, Result};

pub use list::{IndexId, IndexPosition, IndexedList};

pub use logging::init_logging;

pub use overlay::{InodeRegistry, OverlayStore};
