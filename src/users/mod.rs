pub mod dto;
pub mod repo;
pub mod repo_types;

pub use dto::NewUser;
pub use repo::{UserLookup, UserStore};
pub use repo_types::{StoreState, User};
