pub mod key;
mod mariadb;
mod memory;
mod model;
mod pool;

pub use key::{KeyInterface, ListParams, PublicKey, SigningKey};
pub use mariadb::*;
pub use memory::KeyMemory;
pub use model::List;
pub use pool::connection_manager;
