pub mod control;
pub mod login;
pub mod watch;
