pub mod identity;
pub mod session;
pub mod user;
pub mod voucher;

pub use identity::{AuthMethod, Credential, Identity};
pub use session::{ProvisioningRecord, RouterHandle, Session};
pub use user::LocalUser;
pub use voucher::{Voucher, VoucherState};
