pub mod calendar;
pub mod composer;
pub mod events;
pub mod lifecycle;
pub mod messaging;
pub mod payments;
pub mod projection;
pub mod retry;
pub mod span;
pub mod validator;
