//! Record implementations for the hotel collections.

use crate::store::Record;

use super::types::{Bill, Client, Reservation, Room};

macro_rules! impl_record {
  ($ty:ty, $collection:literal) => {
    impl Record for $ty {
      fn collection() -> &'static str {
        $collection
      }

      fn id(&self) -> Option<&str> {
        self.id.as_deref()
      }

      fn set_id(&mut self, id: String) {
        self.id = Some(id);
      }

      fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
      }

      fn set_created_at(&mut self, at: String) {
        self.created_at = Some(at);
      }
    }
  };
}

impl_record!(Room, "rooms");
impl_record!(Client, "clients");
impl_record!(Reservation, "reservations");
impl_record!(Bill, "bills");
