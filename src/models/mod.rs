pub mod availability;
pub mod grid;
pub mod provider;
pub mod reservation;

pub use availability::Availability;
pub use grid::{Cell, Day, StoredCell};
pub use provider::{Provider, ServiceOffering};
pub use reservation::{PaymentState, Reservation, ReservationStatus};
