pub mod email;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod pg;
pub mod store;

pub use email::{is_valid_email, normalize_email};
pub use model::User;
pub use pg::PgUserStore;
pub use store::{StoreError, UserStore};
