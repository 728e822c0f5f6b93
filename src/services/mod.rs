pub mod email;
pub mod payments;

pub use email::{EmailMessage, Mailer};
pub use payments::MercadoPago;
