pub mod password;
pub mod validation;

pub use password::{CredentialHasher, HashCost, HashError};
pub use validation::{is_valid_email, validate_new_user, ValidationError};
