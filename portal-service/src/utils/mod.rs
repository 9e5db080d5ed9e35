pub mod password;
pub mod token;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use token::{
    generate_hotspot_password, generate_reservation_id, generate_session_id,
    generate_voucher_code,
};
pub use validation::ValidatedJson;
