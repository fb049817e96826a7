pub mod guards;

pub use guards::CurrentUser;
