pub mod memory;
pub mod model;
pub mod pg;
pub mod repo;
pub mod validate;

pub use memory::MemoryUserStore;
pub use model::{ApiUsage, NewUser, Preferences, Profile, Role, StoredToken, Topic, User};
pub use pg::PgUserStore;
pub use repo::{FailedLogin, StoreError, StoreResult, UserStore};
