//! Hotel collections: the concrete record shapes stored by the sync layer.

mod records;
mod types;

pub use types::{Bill, Client, Reservation, Room};

use clap::ValueEnum;

/// The collections known to the front desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Collection {
  Rooms,
  Clients,
  Reservations,
  Bills,
}

impl Collection {
  pub const ALL: [Collection; 4] = [
    Collection::Rooms,
    Collection::Clients,
    Collection::Reservations,
    Collection::Bills,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Collection::Rooms => "rooms",
      Collection::Clients => "clients",
      Collection::Reservations => "reservations",
      Collection::Bills => "bills",
    }
  }
}
